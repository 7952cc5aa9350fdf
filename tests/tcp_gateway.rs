//! End-to-end tests against a fake RS485-to-TCP gateway on loopback.

use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout};

use kocom_wallpad::protocol::cmd;
use kocom_wallpad::{
    Command, Config, ConnectionState, DeviceKey, DeviceType, Frame, FrameParser, GatewayConfig,
    ReconnectConfig, TcpConfig, Wallpad, WallpadError,
};

/// Plays every device on the bus: commands are echoed back as confirmations,
/// queries go unanswered.
async fn serve(mut socket: TcpStream) {
    let mut parser = FrameParser::new();
    let mut buf = [0u8; 256];
    loop {
        let n = match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        for frame in parser.feed(&buf[..n]) {
            if frame.command() == cmd::QUERY {
                continue;
            }
            if socket.write_all(frame.as_reply().as_bytes()).await.is_err() {
                return;
            }
        }
    }
}

fn config_for(listener: &TcpListener) -> Config {
    let port = listener.local_addr().unwrap().port();
    Config {
        transport: TcpConfig { host: "127.0.0.1".into(), port, ..TcpConfig::default() },
        gateway: GatewayConfig {
            discover_on_start: false,
            reconnect: ReconnectConfig {
                initial_delay_ms: 50,
                max_delay_ms: 200,
                max_retries: None,
            },
            ..GatewayConfig::default()
        },
    }
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    timeout(Duration::from_secs(5), async {
        while !check() {
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition not reached within 5s");
}

#[tokio::test]
async fn command_is_confirmed_over_tcp() {
    let _ = tracing_subscriber::fmt::try_init();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = config_for(&listener);
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(serve(socket));
        }
    });

    let gateway = Wallpad::connect(config).await.unwrap();
    gateway.connection_state().wait_for(|s| s.is_linked()).await.unwrap();

    let key = DeviceKey::new(DeviceType::Outlet, 2).with_index(1);
    let state = gateway.send(Command::turn_on(key)).await.unwrap();
    assert_eq!(state.power(), Some(true));
    assert!(*gateway.availability().borrow());
    assert_eq!(*gateway.connection_state().borrow(), ConnectionState::Connected);

    let state = gateway.send(Command::turn_off(key)).await.unwrap();
    assert_eq!(state.power(), Some(false));
    assert_eq!(gateway.diagnostics().reconnects, 0);

    gateway.shutdown().await;
}

#[tokio::test]
async fn dropped_connection_is_replaced() {
    let _ = tracing_subscriber::fmt::try_init();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = config_for(&listener);
    tokio::spawn(async move {
        // The first connection dies right away.
        if let Ok((socket, _)) = listener.accept().await {
            drop(socket);
        }
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(serve(socket));
        }
    });

    let gateway = Wallpad::connect(config).await.unwrap();
    wait_until(|| {
        let d = gateway.diagnostics();
        d.reconnects == 1 && d.connection_state.is_linked()
    })
    .await;

    let state = gateway.send(Command::call_elevator(0)).await;
    assert!(state.is_ok(), "{state:?}");

    gateway.shutdown().await;
}

#[tokio::test]
async fn unreachable_gateway_rejects_commands() {
    // Bind then drop to get a port nothing listens on.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = config_for(&listener);
    drop(listener);

    let gateway = Wallpad::connect(config).await.unwrap();
    let err = gateway.send(Command::turn_on(DeviceKey::new(DeviceType::Light, 0))).await;
    assert!(matches!(err, Err(WallpadError::NotConnected)));
    assert_eq!(*gateway.connection_state().borrow(), ConnectionState::Reconnecting);

    gateway.shutdown().await;
    assert!(matches!(
        gateway.send(Command::turn_on(DeviceKey::new(DeviceType::Light, 0))).await,
        Err(WallpadError::Stopped)
    ));
}

#[tokio::test]
async fn opens_from_a_config_file() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let yaml = config_for(&listener).to_yaml().unwrap();
    let path = std::env::temp_dir().join(format!("kocom-wallpad-{}.yaml", std::process::id()));
    std::fs::write(&path, yaml).unwrap();

    let accepted = tokio::spawn(async move { listener.accept().await.map(|_| ()) });
    let gateway = Wallpad::open(&path).await.unwrap();
    timeout(Duration::from_secs(5), accepted).await.unwrap().unwrap().unwrap();

    gateway.shutdown().await;
    std::fs::remove_file(&path).ok();
}

#[tokio::test]
async fn invalid_config_is_rejected_before_connecting() {
    let config = Config {
        gateway: GatewayConfig { queue_capacity: 0, ..GatewayConfig::default() },
        ..Config::default()
    };
    let result = Wallpad::connect(config).await;
    assert!(matches!(result, Err(WallpadError::Config { .. })));
}

#[test]
fn replies_mirror_commands() {
    let payload = [0xFF, 0, 0, 0, 0, 0, 0, 0];
    let command = Frame::build([0x0E, 0x01], [0x01, 0x00], cmd::STATE, payload);
    let reply = command.as_reply();
    assert_eq!(reply.dest(), command.src());
    assert_eq!(reply.src(), command.dest());
    assert_eq!(reply.payload(), command.payload());
}
