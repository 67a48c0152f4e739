use std::collections::HashSet;
use std::io::ErrorKind;
use std::time::Duration;

use ep_data::{Column, Dataset};
use ep_exchange::{Distributer, Exchange, ExchangeConfig, ExchangeError, ScatterPolicy};

#[tokio::test]
async fn test_single_node_uses_short_circuit() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let addr = test_helper::get_unused_addr().to_string();
    let distributer = Distributer::bind(addr.clone()).await?;
    let config = ExchangeConfig::new(distributer.clone(), [&addr], &addr, &addr);
    assert!(config.is_single_node());

    for mut exchange in [Exchange::scatter(), Exchange::gather(), Exchange::partition([0])] {
        exchange.init(&config).await?;

        let connections = exchange.connections();
        assert_eq!(connections.len(), 1);
        assert!(connections[0].connection().is_short_circuit());
        assert_eq!(connections[0].route(), addr);

        let batch = Dataset::new(vec![Column::texts(["a", "b", "c"])])?;
        exchange.send(batch.clone()).await?;
        exchange.finish().await?;

        assert_eq!(exchange.recv().await?, Some(batch));
        assert_eq!(exchange.recv().await?, None);
        assert_eq!(exchange.recv().await?, None, "End of stream is sticky");

        exchange.close().await?;
        assert_eq!(exchange.statistics().num_connections_opened(), 1);
        assert_eq!(exchange.statistics().num_open_connections(), 0);
    }

    assert_eq!(distributer.num_registered(), 0);
    distributer.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_dial_failure_rolls_back() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let addr = test_helper::get_unused_addr().to_string();
    let unreachable = test_helper::get_unused_addr().to_string();
    let distributer = Distributer::bind(addr.clone()).await?;

    let mut exchange = Exchange::scatter();
    let config = ExchangeConfig::new(distributer.clone(), [&addr, &unreachable], &addr, &addr);

    let err = exchange.init(&config).await.unwrap_err();
    assert!(matches!(err, ExchangeError::Dial { ref addr, .. } if addr == &unreachable));
    assert_eq!(err.io_kind(), Some(ErrorKind::ConnectionRefused));
    assert!(err.to_string().starts_with(&format!("dial {unreachable}: ")));

    let statistics = exchange.statistics();
    assert_eq!(statistics.num_connections_opened(), 1);
    assert_eq!(statistics.num_connections_closed(), 1);
    assert!(exchange.connections().is_empty());
    assert!(!exchange.is_running());
    assert_eq!(distributer.num_registered(), 0, "Mailbox must be released");

    distributer.close().await?;
    Ok(())
}

async fn wait_for_pending(distributer: &Distributer, n: usize) -> anyhow::Result<()> {
    for _ in 0..500 {
        if distributer.num_pending() == n {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    anyhow::bail!(
        "Distributer still holds {} pending exchanges, expected {}",
        distributer.num_pending(),
        n
    )
}

#[tokio::test]
async fn test_failed_inits_leave_no_pending_mailboxes() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let addrs = test_helper::get_unused_addrs(2);
    let unreachable = test_helper::get_unused_addr().to_string();
    let node_a = Distributer::bind(addrs[0].clone()).await?;
    let node_b = Distributer::bind(addrs[1].clone()).await?;

    let config = ExchangeConfig::new(
        node_a.clone(),
        [&addrs[0], &addrs[1], &unreachable],
        &addrs[0],
        &addrs[0],
    );
    for _ in 0..5 {
        let mut exchange = Exchange::scatter();
        let err = exchange.init(&config).await.unwrap_err();
        assert!(matches!(err, ExchangeError::Dial { ref addr, .. } if addr == &unreachable));
    }

    // Give node B time to read the handshakes and the rollbacks.
    tokio::time::sleep(Duration::from_millis(300)).await;
    wait_for_pending(&node_b, 0).await?;
    assert_eq!(node_b.num_registered(), 0);
    assert_eq!(node_a.num_registered(), 0);

    node_a.close().await?;
    node_b.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_dial_timeout_rolls_back() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let addrs = test_helper::get_unused_addrs(2);
    let stalled = test_helper::full_listener().await;
    let stalled_addr = stalled.local_addr().to_string();
    let node_a = Distributer::bind(addrs[0].clone()).await?;
    let node_b = Distributer::bind(addrs[1].clone()).await?;

    let mut exchange = Exchange::gather();
    let config = ExchangeConfig::new(
        node_a.clone(),
        [&addrs[0], &addrs[1], &stalled_addr],
        &addrs[0],
        &addrs[0],
    )
    .with_dial_timeout(Duration::from_millis(100));

    let err = exchange.init(&config).await.unwrap_err();
    assert!(matches!(err, ExchangeError::DialTimeout { ref addr } if addr == &stalled_addr));
    assert_eq!(err.io_kind(), Some(ErrorKind::TimedOut));

    let statistics = exchange.statistics();
    assert_eq!(statistics.num_connections_opened(), 2);
    assert_eq!(statistics.num_connections_closed(), 2);
    assert_eq!(statistics.num_open_connections(), 0);
    assert!(exchange.connections().is_empty());
    assert!(!exchange.is_running());
    assert_eq!(node_a.num_registered(), 0);

    wait_for_pending(&node_b, 0).await?;

    node_a.close().await?;
    node_b.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_init_requires_open_distributer() -> anyhow::Result<()> {
    let addr = test_helper::get_unused_addr().to_string();
    let distributer = Distributer::bind(addr.clone()).await?;
    distributer.close().await?;

    let mut exchange = Exchange::gather();
    let config = ExchangeConfig::new(distributer, [&addr], &addr, &addr);
    assert!(matches!(
        exchange.init(&config).await,
        Err(ExchangeError::DistributerClosed)
    ));
    Ok(())
}

#[test]
fn test_uids_are_unique() {
    let mut uids = HashSet::new();
    for i in 0..1_000 {
        let exchange = match i % 4 {
            0 => Exchange::scatter(),
            1 => Exchange::scatter_with(ScatterPolicy::Broadcast),
            2 => Exchange::gather(),
            _ => Exchange::partition([0]),
        };
        assert!(uids.insert(exchange.uid()), "UID {} repeated", exchange.uid());
    }
    assert_eq!(uids.len(), 1_000);
}
