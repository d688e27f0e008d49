use bytes::Bytes;
use flash_ds::{
  db::Datastore,
  key::Key,
  option::Options,
  query::{FilterValueCompare, Op, Order, OrderByValue, Query},
};

#[tokio::main]
async fn main() {
  env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

  let opts = Options::default();
  let ds = Datastore::open(opts).expect("failed to open datastore");

  let users = Key::new("/users");
  for (name, age) in [("alice", "31"), ("bob", "27"), ("carol", "45"), ("dave", "19")] {
    ds.put(&users.child(name), age).expect("failed to put");
  }
  ds.put(&Key::new("/groups/admins"), "alice")
    .expect("failed to put");

  let age = ds.get(&users.child("bob")).expect("failed to get");
  println!("bob is {}", String::from_utf8_lossy(&age));

  let mut batch = ds.batch().expect("failed to start batch");
  batch.delete(&users.child("dave")).expect("failed to delete");
  batch.put(&users.child("erin"), "52").expect("failed to put");
  batch.commit().expect("failed to commit batch");

  let mut results = ds
    .query(Query::new("/users").with_order(Order::ByKeyDescending))
    .expect("failed to query");
  while let Some(res) = results.next().await {
    let entry = res.expect("query failed");
    println!("{} = {:?}", entry.key, entry.value);
  }

  let query = Query::new("/users")
    .with_filter(FilterValueCompare {
      op: Op::Gt,
      value: Bytes::from("30"),
    })
    .with_order(Order::other(OrderByValue))
    .with_limit(2);
  for entry in ds.query(query).expect("failed to query").rest().await.expect("query failed") {
    println!("over 30: {}", entry.key);
  }

  ds.sync().expect("failed to sync");
  println!("disk usage: {} bytes", ds.disk_usage());

  ds.close().await.expect("failed to close");
}
