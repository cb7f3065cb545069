//! Tunnel lifecycle integration tests
//!
//! Exercises the registry and tunnel actors end to end against the mock
//! driver: open/close, duplicate opens, TTL expiry, bring-up failure,
//! lease extension and adoption of configs left on disk.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use tempfile::TempDir;

use wg_fleet::driver::MockDriver;
use wg_fleet::registry::{RegistryError, TunnelRegistry};
use wg_fleet::tunnel::{
    ExitReason, InterfaceDescriptor, PeerDescriptor, Table, TunnelOptions, TunnelStatus,
};

fn test_interface(id: &str, last_octet: u8, port: u16) -> InterfaceDescriptor {
    InterfaceDescriptor {
        id: id.to_string(),
        ip_address: Ipv4Addr::new(10, 100, 0, last_octet),
        port,
        private_key: "2PSyTqm+3rXzUK+T8jBhgZp9UHjFkgVZv4bXncWMyXY=".into(),
        public_key: "Pu7ymHtDqF4X9VNjVj9mYFBh/z7LGxY6VQJAGiSEgTM=".into(),
        table: Table::Auto,
    }
}

fn test_peer() -> PeerDescriptor {
    PeerDescriptor {
        ip_address: Ipv4Addr::new(10, 100, 0, 200),
        endpoint: "203.0.113.5".into(),
        port: 51820,
        public_key: "h2W8fjxUwZH+G8/Qp/H7kzn4SQz/EJIhOVFMh6mmtX4=".into(),
        persistent_keepalive: 25,
    }
}

fn test_registry() -> (TunnelRegistry, TempDir) {
    let dir = TempDir::new().unwrap();
    (TunnelRegistry::new(Arc::new(MockDriver::new())), dir)
}

/// Poll until the registry's live set reaches `len`, or panic
async fn wait_for_list_len(registry: &TunnelRegistry, len: usize, within: Duration) {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if registry.list().len() == len {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "registry did not reach {len} tunnels in time: {:?}",
            registry.list().iter().map(|(id, _, _)| id.clone()).collect::<Vec<_>>()
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn open_close_happy_path() {
    let (registry, dir) = test_registry();
    let opts = TunnelOptions {
        expires_at: Some(SystemTime::now() + Duration::from_secs(3600)),
        ..TunnelOptions::with_data_dir(dir.path())
    };

    registry
        .open("t1", test_interface("peridio-AAAAAAA", 1, 50001), test_peer(), opts.clone())
        .await
        .unwrap();

    // The config exists as soon as open returns.
    let conf = opts.conf_path("peridio-AAAAAAA");
    assert!(conf.exists());

    let listed = registry.list();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].0, "t1");
    assert_eq!(listed[0].2.id, "peridio-AAAAAAA");

    // The mock reports the interface as present, so the actor reaches Up.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let state = registry.get_state("t1").await.unwrap();
        if state.status == TunnelStatus::Up {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "tunnel never came up");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    registry.close("t1", ExitReason::Normal).await.unwrap();
    wait_for_list_len(&registry, 0, Duration::from_secs(5)).await;
    assert!(!conf.exists());
}

#[tokio::test]
async fn duplicate_open_exactly_one_wins() {
    let (registry, dir) = test_registry();
    let registry = Arc::new(registry);
    let opts = TunnelOptions::with_data_dir(dir.path());

    let a = {
        let registry = Arc::clone(&registry);
        let opts = opts.clone();
        tokio::spawn(async move {
            registry
                .open("t1", test_interface("peridio-AAAAAAA", 1, 50001), test_peer(), opts)
                .await
        })
    };
    let b = {
        let registry = Arc::clone(&registry);
        let opts = opts.clone();
        tokio::spawn(async move {
            registry
                .open("t1", test_interface("peridio-BBBBBBB", 2, 50002), test_peer(), opts)
                .await
        })
    };

    let (a, b) = (a.await.unwrap(), b.await.unwrap());
    let winners = [&a, &b].iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1, "exactly one open should win: {a:?} / {b:?}");
    let loser = if a.is_err() { a } else { b };
    assert!(matches!(loser, Err(RegistryError::AlreadyRunning(id)) if id == "t1"));
}

#[tokio::test]
async fn ttl_expiry_stops_the_tunnel() {
    let (registry, dir) = test_registry();
    let exits: Arc<Mutex<Vec<ExitReason>>> = Arc::new(Mutex::new(Vec::new()));
    let exits_clone = Arc::clone(&exits);

    let opts = TunnelOptions {
        expires_at: Some(SystemTime::now() + Duration::from_secs(2)),
        on_exit: Some(Arc::new(move |reason| {
            exits_clone.lock().unwrap().push(reason);
        })),
        ..TunnelOptions::with_data_dir(dir.path())
    };

    registry
        .open("t2", test_interface("peridio-CCCCCCC", 3, 50003), test_peer(), opts)
        .await
        .unwrap();
    assert_eq!(registry.list().len(), 1);

    tokio::time::sleep(Duration::from_secs(3)).await;
    wait_for_list_len(&registry, 0, Duration::from_secs(2)).await;

    let exits = exits.lock().unwrap();
    assert_eq!(exits.as_slice(), &[ExitReason::TtlTimeout]);
}

#[tokio::test]
async fn bring_up_failure_tears_down_promptly() {
    let (registry, dir) = test_registry();
    let calls = Arc::new(AtomicUsize::new(0));
    let reasons: Arc<Mutex<Vec<ExitReason>>> = Arc::new(Mutex::new(Vec::new()));
    let (calls_clone, reasons_clone) = (Arc::clone(&calls), Arc::clone(&reasons));

    let opts = TunnelOptions {
        on_exit: Some(Arc::new(move |reason| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            reasons_clone.lock().unwrap().push(reason);
        })),
        ..TunnelOptions::with_data_dir(dir.path())
    };

    // `failure` makes the mock's bring-up exit 1; open itself still
    // succeeds because the actor starts before bring-up runs.
    registry
        .open("t3", test_interface("failure", 4, 50004), test_peer(), opts.clone())
        .await
        .unwrap();

    wait_for_list_len(&registry, 0, Duration::from_secs(5)).await;
    // Let the detached exit-callback task run.
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(reasons.lock().unwrap().as_slice(), &[ExitReason::DeviceUp]);
    assert_eq!(
        reasons.lock().unwrap()[0].to_string(),
        "device_error_interface_up"
    );
    assert!(!opts.conf_path("failure").exists());
}

#[tokio::test]
async fn extend_pushes_expiry_out() {
    let (registry, dir) = test_registry();
    let opts = TunnelOptions {
        expires_at: Some(SystemTime::now() + Duration::from_secs(2)),
        ..TunnelOptions::with_data_dir(dir.path())
    };

    registry
        .open("t4", test_interface("peridio-DDDDDDD", 5, 50005), test_peer(), opts)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;
    registry
        .extend("t4", SystemTime::now() + Duration::from_secs(9))
        .await
        .unwrap();

    // Past the original expiry the tunnel must still be there.
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(registry.list().len(), 1, "tunnel died at its original TTL");

    // And past the extended expiry it must be gone.
    tokio::time::sleep(Duration::from_secs(8)).await;
    wait_for_list_len(&registry, 0, Duration::from_secs(2)).await;
}

#[tokio::test]
async fn adoption_of_existing_conf() {
    let dir = TempDir::new().unwrap();
    let driver = Arc::new(MockDriver::new());
    let opts = TunnelOptions::with_data_dir(dir.path());
    let interface = test_interface("peridio-EEEEEEE", 6, 50006);

    // A previous run left a config behind.
    {
        use wg_fleet::driver::Driver;
        driver
            .configure_wireguard("t5", &interface, &test_peer(), &opts)
            .await
            .unwrap();
    }

    let registry = TunnelRegistry::new(driver);
    registry
        .open("t5", interface, test_peer(), opts.clone())
        .await
        .unwrap();

    // The mock reports the interface as existing, so the tunnel is
    // adopted straight into Up.
    let state = registry.get_state("t5").await.unwrap();
    assert_eq!(state.status, TunnelStatus::Up);

    registry.close("t5", ExitReason::Normal).await.unwrap();
    wait_for_list_len(&registry, 0, Duration::from_secs(5)).await;
    assert!(!opts.conf_path("peridio-EEEEEEE").exists());
}

#[tokio::test]
async fn close_returns_not_running_after_exit() {
    let (registry, dir) = test_registry();
    let opts = TunnelOptions::with_data_dir(dir.path());

    registry
        .open("t6", test_interface("peridio-FFFFFFF", 7, 50007), test_peer(), opts)
        .await
        .unwrap();
    registry.close("t6", ExitReason::Normal).await.unwrap();
    wait_for_list_len(&registry, 0, Duration::from_secs(5)).await;

    assert!(matches!(
        registry.close("t6", ExitReason::Normal).await,
        Err(RegistryError::NotRunning(_))
    ));
}

#[tokio::test]
async fn close_all_drains_the_fleet() {
    let (registry, dir) = test_registry();
    let opts = TunnelOptions::with_data_dir(dir.path());

    for (i, (id, iface)) in [
        ("a", "peridio-GGGGGGG"),
        ("b", "peridio-HHHHHHH"),
        ("c", "peridio-JJJJJJJ"),
    ]
    .iter()
    .enumerate()
    {
        registry
            .open(
                id,
                test_interface(iface, 10 + i as u8, 50010 + i as u16),
                test_peer(),
                opts.clone(),
            )
            .await
            .unwrap();
    }
    assert_eq!(registry.list().len(), 3);

    registry.close_all(Duration::from_secs(5)).await;
    assert!(registry.list().is_empty());
}
