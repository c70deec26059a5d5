use script_mpi::{Config, NdArray, SerializerKind, Value, ANY_SOURCE, ANY_TAG};

mod common;
use common::{cluster, run_ranks, run_with};

#[test]
fn send_recv_scalars() {
    let results = run_ranks(2, |comm| {
        if comm.rank() == 0 {
            comm.send(&Value::Int(42), 1, 3)?;
            comm.send(&Value::Float(-0.5), 1, 4)?;
            Ok(vec![])
        } else {
            let (a, status) = comm.recv(0, 3)?;
            assert_eq!(status.source, 0);
            assert_eq!(status.tag, 3);
            let (b, _) = comm.recv(0, 4)?;
            Ok(vec![a, b])
        }
    });
    assert_eq!(results[1], vec![Value::Int(42), Value::Float(-0.5)]);
}

#[test]
fn send_recv_with_overflow() {
    let big = Value::bytes((0..10_000).map(|i| (i % 251) as u8).collect::<Vec<u8>>());
    let nested = Value::List((0..200).map(|i| Value::str(format!("item {}", i))).collect());
    let expected = (big.clone(), nested.clone());
    let results = run_ranks(2, move |comm| {
        if comm.rank() == 0 {
            comm.send(&big, 1, 0)?;
            comm.send(&nested, 1, 0)?;
            Ok(None)
        } else {
            let (a, _) = comm.recv(0, 0)?;
            let (b, _) = comm.recv(0, 0)?;
            Ok(Some((a, b)))
        }
    });
    assert_eq!(results[1], Some(expected));
}

#[test]
fn wildcard_receives_report_the_sender() {
    let results = run_ranks(3, |comm| {
        match comm.rank() {
            0 => {
                let mut seen = vec![];
                for _ in 0..2 {
                    let (value, status) = comm.recv(ANY_SOURCE, ANY_TAG)?;
                    assert_eq!(value, Value::Int(status.source as i64 * 10));
                    assert_eq!(status.tag, status.source + 100);
                    seen.push(status.source);
                }
                seen.sort();
                Ok(seen)
            }
            r => {
                comm.send(&Value::Int(r as i64 * 10), 0, r + 100)?;
                Ok(vec![])
            }
        }
    });
    assert_eq!(results[0], vec![1, 2]);
}

#[test]
fn sendrecv_shifts_around_a_ring() {
    let results = run_ranks(3, |comm| {
        let rank = comm.rank();
        let (value, status) = comm.sendrecv(
            &Value::Int(rank as i64),
            (rank + 1) % 3,
            5,
            (rank + 2) % 3,
            5,
        )?;
        assert_eq!(status.source, (rank + 2) % 3);
        Ok(value)
    });
    assert_eq!(results, vec![Value::Int(2), Value::Int(0), Value::Int(1)]);
}

#[test]
fn numeric_arrays_keep_type_and_shape() {
    let array = NdArray::new(vec![3, 2], &[1.5f64, 2.5, 3.5, 4.5, 5.5, 6.5]).unwrap();
    let sent = Value::Array(array.clone());
    let results = run_ranks(2, move |comm| {
        if comm.rank() == 0 {
            comm.send(&sent, 1, 9)?;
            Ok(Value::None)
        } else {
            Ok(comm.recv(0, 9)?.0)
        }
    });
    assert_eq!(results[1], Value::Array(array));
}

#[test]
fn other_serializers_and_eager_limits() {
    let value = Value::Map(vec![
        (Value::str("name"), Value::str("rank")),
        (Value::str("values"), Value::List(vec![Value::Int(1), Value::None, Value::Bool(true)])),
    ]);
    for serializer in [SerializerKind::MessagePack, SerializerKind::Postcard] {
        let config = Config {
            eager_limit: 64,
            serializer,
            ..Config::default()
        };
        let sent = value.clone();
        let results = run_with(cluster(2), config, move |comm| {
            if comm.rank() == 0 {
                comm.send(&sent, 1, 1)?;
                Ok(Value::None)
            } else {
                Ok(comm.recv(0, 1)?.0)
            }
        });
        assert_eq!(results[1], value);
    }
}

#[test]
fn barrier_completes_on_every_rank() {
    let results = run_ranks(4, |comm| {
        comm.barrier()?;
        comm.barrier()?;
        Ok(comm.rank())
    });
    assert_eq!(results, vec![0, 1, 2, 3]);
}
