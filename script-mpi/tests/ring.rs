use script_mpi::{wait_all, Config, SerializerKind, Value};

mod common;
use common::{cluster, run_with};

const RING_TAG: i32 = 7;

fn ring(size: usize, config: Config, padding: usize) -> Vec<Value> {
    run_with(cluster(size), config, move |comm| {
        let rank = comm.rank();
        let size = comm.size() as i32;
        let message = Value::List(vec![
            Value::str(rank.to_string()),
            Value::bytes(vec![b'.'; padding]),
        ]);
        // Rendezvous-sized overflows only complete once the neighbour posts
        // its overflow receive, so the receive is waited on first.
        let mut requests = vec![
            comm.irecv((rank + size - 1) % size, RING_TAG)?,
            comm.isend(&message, (rank + 1) % size, RING_TAG)?,
        ];
        let statuses = wait_all(&mut requests)?;
        assert_eq!(statuses[0].source, (rank + size - 1) % size);
        let received = requests[0].take_value().unwrap_or(Value::None);
        Ok(match received {
            Value::List(mut items) if !items.is_empty() => items.swap_remove(0),
            other => other,
        })
    })
}

#[test]
fn each_rank_receives_its_left_neighbour() {
    let received = ring(4, Config::default(), 0);
    assert_eq!(received[2], Value::str("1"));
    assert_eq!(received[0], Value::str("3"));
}

#[test]
fn ring_with_overflow_and_messagepack() {
    let config = Config {
        serializer: SerializerKind::MessagePack,
        ..Config::default()
    };
    let received = ring(5, config, 100_000);
    let expected: Vec<Value> = (0..5).map(|r| Value::str(((r + 4) % 5).to_string())).collect();
    assert_eq!(received, expected);
}

#[test]
fn send_posted_before_receive() {
    let received = run_with(cluster(4), Config::default(), |comm| {
        let rank = comm.rank();
        let mut requests = vec![
            comm.isend(&Value::str(rank.to_string()), (rank + 1) % 4, RING_TAG)?,
            comm.irecv((rank + 3) % 4, RING_TAG)?,
        ];
        wait_all(&mut requests)?;
        Ok(requests[1].take_value())
    });
    assert_eq!(received[2], Some(Value::str("1")));
}
