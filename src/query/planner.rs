use crate::errors::{Errors, Result};

use super::Order;

/// Direction a cursor is walked in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
  Forward,
  Reverse,
}

impl Direction {
  fn of(order: &Order) -> Option<Direction> {
    match order {
      Order::ByKey => Some(Direction::Forward),
      Order::ByKeyDescending => Some(Direction::Reverse),
      Order::Other(_) => None,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
  /// The cursor order is the requested order; stream lazily.
  Native(Direction),
  /// Scan the prefix (in the extracted key order, if any), materialize it,
  /// then filter, sort, skip and limit in memory.
  Fallback(Option<Direction>),
}

pub fn plan(orders: &[Order]) -> Result<Plan> {
  match orders {
    [] => Ok(Plan::Native(Direction::Forward)),
    [only] => Ok(match Direction::of(only) {
      Some(direction) => Plan::Native(direction),
      None => Plan::Fallback(None),
    }),
    many => {
      let mut base = None;
      for direction in many.iter().filter_map(Direction::of) {
        match base {
          Some(existing) if existing != direction => {
            return Err(Errors::IncompatibleOrders(format!("{:?}", orders)));
          }
          _ => base = Some(direction),
        }
      }
      Ok(Plan::Fallback(base))
    }
  }
}
