use crate::*;

use dcproxy_registry::CertRefresher;
use tokio::sync::broadcast;

#[tokio::test]
async fn refresh_picks_up_new_shared_key() -> Result<()> {
    let negotiator = Arc::new(ScriptedNegotiator::default());
    let reg = registry(negotiator.clone());
    reg.register("a", stamp("a", "203.0.113.1:443")).await?;
    let before = reg.get("a").await.context("a should be registered")?;

    let report = reg.refresh().await;
    assert_eq!(report.refreshed, vec!["a"]);

    let after = reg.get("a").await.context("a should be registered")?;
    assert_eq!(key_serial(&before.shared_key), 0);
    assert_eq!(key_serial(&after.shared_key), 1);
    assert_eq!(after.name, before.name);
    assert_eq!(after.udp_addr, before.udp_addr);
    assert_eq!(after.tcp_addr, before.tcp_addr);
    Ok(())
}

#[tokio::test]
async fn refresh_keeps_failed_server_selectable() -> Result<()> {
    let negotiator = Arc::new(ScriptedNegotiator::default());
    let reg = registry(negotiator.clone());
    reg.register("a", stamp("a", "203.0.113.1:443")).await?;
    reg.register("b", stamp("b", "203.0.113.2:443")).await?;
    let b_before = reg.get("b").await.context("b should be registered")?;

    negotiator.fail("203.0.113.2:443");
    let report = reg.refresh().await;

    assert_eq!(report.refreshed, vec!["a"]);
    assert_eq!(report.failed_names(), vec!["b"]);
    assert_eq!(report.failed[0].1.server_name(), "b");
    assert_eq!(reg.len().await, 2);

    let b_after = reg.get("b").await.context("b should still be registered")?;
    assert!(Arc::ptr_eq(&b_before, &b_after));

    let mut saw_b = false;
    for _ in 0..200 {
        if reg.select_one().await?.name == "b" {
            saw_b = true;
            break;
        }
    }
    assert!(saw_b, "stale server should remain selectable");

    negotiator.heal("203.0.113.2:443");
    let report = reg.refresh().await;
    assert!(report.failed.is_empty());
    let b_healed = reg.get("b").await.context("b should be registered")?;
    assert!(!Arc::ptr_eq(&b_before, &b_healed));
    Ok(())
}

#[tokio::test]
async fn refresh_uses_the_latest_stamp() -> Result<()> {
    let negotiator = Arc::new(ScriptedNegotiator::default());
    let reg = registry(negotiator.clone());
    reg.register("a", stamp("a", "203.0.113.1:443")).await?;

    // The operator moves "a" to a new address.
    reg.register("a", stamp("a", "203.0.113.50:443")).await?;
    reg.refresh().await;

    let a = reg.get("a").await.context("a should be registered")?;
    assert_eq!(a.udp_addr, "203.0.113.50:443".parse::<SocketAddr>()?);
    assert_eq!(negotiator.calls(), 3);
    assert_eq!(
        negotiator.provider_for("203.0.113.50:443").as_deref(),
        Some("2.dnscrypt-cert.a.example")
    );
    Ok(())
}

#[tokio::test]
async fn registration_during_refresh_is_not_overwritten() -> Result<()> {
    let negotiator = Arc::new(ScriptedNegotiator::default());
    let reg = Arc::new(registry(negotiator.clone()));
    reg.register("a", stamp("a", "203.0.113.1:443")).await?;

    let gate = negotiator.hold("203.0.113.1:443");
    let refresh = tokio::spawn({
        let reg = reg.clone();
        async move { reg.refresh().await }
    });
    gate.entered().await;

    // The operator moves "a" while its refresh is still negotiating.
    reg.register("a", stamp("a", "203.0.113.50:443")).await?;
    gate.release();
    let report = refresh.await?;

    assert_eq!(report.superseded, vec!["a"]);
    assert!(report.refreshed.is_empty());
    assert!(report.failed.is_empty());

    let a_stamp = reg.stamp("a").await.context("a should be registered")?;
    assert_eq!(a_stamp.address, "203.0.113.50:443");
    let a = reg.get("a").await.context("a should be registered")?;
    assert_eq!(a.udp_addr, "203.0.113.50:443".parse::<SocketAddr>()?);
    assert_eq!(a.tcp_addr, "203.0.113.50:443".parse::<SocketAddr>()?);

    // The next pass negotiates against the new address.
    let report = reg.refresh().await;
    assert_eq!(report.refreshed, vec!["a"]);
    let a = reg.get("a").await.context("a should be registered")?;
    assert_eq!(a.udp_addr, "203.0.113.50:443".parse::<SocketAddr>()?);
    assert_eq!(key_serial(&a.shared_key), 3);
    Ok(())
}

#[tokio::test]
async fn registration_started_before_refresh_lands_after_it() -> Result<()> {
    let negotiator = Arc::new(ScriptedNegotiator::default());
    let reg = Arc::new(registry(negotiator.clone()));
    reg.register("a", stamp("a", "203.0.113.1:443")).await?;

    let gate = negotiator.hold("203.0.113.50:443");
    let moving = tokio::spawn({
        let reg = reg.clone();
        async move { reg.register("a", stamp("a", "203.0.113.50:443")).await }
    });
    gate.entered().await;

    let report = reg.refresh().await;
    assert_eq!(report.refreshed, vec!["a"]);

    gate.release();
    moving.await??;

    let a_stamp = reg.stamp("a").await.context("a should be registered")?;
    assert_eq!(a_stamp.address, "203.0.113.50:443");
    let a = reg.get("a").await.context("a should be registered")?;
    assert_eq!(a.udp_addr, "203.0.113.50:443".parse::<SocketAddr>()?);
    assert_eq!(reg.generation().await, 3);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn refresher_runs_on_schedule_and_shuts_down() -> Result<()> {
    let negotiator = Arc::new(ScriptedNegotiator::default());
    let reg = Arc::new(registry(negotiator.clone()));
    register_numbered(&reg, 2).await?;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let task = tokio::spawn(CertRefresher::new(reg.clone(), Duration::from_secs(1800), shutdown_rx).run());

    tokio::time::sleep(Duration::from_secs(1800 * 2 + 1)).await;
    assert_eq!(negotiator.calls(), 2 + 2 * 2);

    shutdown_tx.send(())?;
    task.await??;
    assert_eq!(reg.len().await, 2);
    Ok(())
}
