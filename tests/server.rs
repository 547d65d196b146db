use std::{
    fs,
    io::{self, Write},
    ops::ControlFlow,
    os::unix::{
        fs::PermissionsExt,
        net::{UnixListener, UnixStream},
    },
    thread,
    time::{Duration, Instant},
};

use namedipc::{
    ClientConfig, ClientError, Ipc, Message, ProcessName, Receiver, ServerConfig, ServerError,
    SocketDir,
};
use tempdir::TempDir;

const WAIT: Duration = Duration::from_secs(5);

fn name(s: &str) -> ProcessName {
    s.parse().unwrap()
}

fn text(content: &str) -> Message {
    Message::generic("text/plain", content).unwrap()
}

fn config() -> ServerConfig {
    ServerConfig::default()
        .with_heartbeat(Duration::from_millis(50))
        .with_poll_interval(Duration::from_millis(10))
}

fn client_config() -> ClientConfig {
    ClientConfig::default().with_timeout(WAIT)
}

#[test]
fn counts_messages_until_stopped() {
    let temp = TempDir::new("server").unwrap();
    let ipc = Ipc::new(SocketDir::new(temp.path()));
    let server = ipc.listen(&name("counter"), config());

    let handle = thread::spawn(move || {
        server.listen(0, |message, continuation| {
            assert_eq!(message.media_type().to_string(), "text/plain");
            let seen = continuation.carry() + 1;
            if seen == 3 {
                Ok(continuation.stop(seen))
            } else {
                Ok(continuation.continue_with(seen))
            }
        })
    });

    assert!(ipc.wait(&name("counter"), WAIT).is_some());
    let mut sender = ipc.sender(name("client"), &name("counter"), client_config());
    assert_eq!(sender.to(), &ipc.address(&name("counter")));
    for content in ["one", "two", "three"] {
        sender.send(&text(content)).unwrap();
    }
    drop(sender);

    assert_eq!(handle.join().unwrap().unwrap(), 3);
    assert!(!ipc.exists(&name("counter")));
}

#[test]
fn responses_reach_the_sender() {
    let temp = TempDir::new("server").unwrap();
    let ipc = Ipc::new(SocketDir::new(temp.path()));
    let server = ipc.listen(&name("echo"), config());

    let handle = thread::spawn(move || {
        server.listen(Vec::<String>::new(), |message, continuation| {
            let mut seen = continuation.carry().clone();
            seen.push(message.text().unwrap_or_default().to_string());

            let reply = text(&message.text().unwrap_or_default().to_uppercase());
            if seen.len() == 2 {
                Ok(continuation.stop(seen))
            } else {
                Ok(continuation.continue_with(seen).respond(reply))
            }
        })
    });

    assert!(ipc.wait(&name("echo"), WAIT).is_some());
    let mut sender = ipc.sender(name("client"), &name("echo"), client_config());
    sender.send(&text("ping")).unwrap();
    assert_eq!(sender.receive().unwrap(), text("PING"));

    sender.send(&text("bye")).unwrap();
    sender.close().unwrap();
    assert!(sender.responses().is_empty());

    assert_eq!(
        handle.join().unwrap().unwrap(),
        vec!["ping".to_string(), "bye".to_string()]
    );
}

#[test]
fn sender_reconnects_after_close() {
    let temp = TempDir::new("server").unwrap();
    let ipc = Ipc::new(SocketDir::new(temp.path()));
    let server = ipc.listen(&name("closer"), config());

    let handle = thread::spawn(move || {
        server.listen(0, |message, continuation| {
            let seen = continuation.carry() + 1;
            match message.text() {
                Some("close") => Ok(continuation.continue_with(seen).close()),
                Some("stop") => Ok(continuation.stop(seen)),
                _ => Ok(continuation.continue_with(seen)),
            }
        })
    });

    assert!(ipc.wait(&name("closer"), WAIT).is_some());
    let mut sender = ipc.sender(name("client"), &name("closer"), client_config());
    sender.send(&text("close")).unwrap();

    // the server closes the connection right after acknowledging
    let deadline = Instant::now() + WAIT;
    while sender.connected() && Instant::now() < deadline {
        sender.responses();
        thread::sleep(Duration::from_millis(10));
    }
    assert!(!sender.connected());

    sender.send(&text("stop")).unwrap();
    assert!(sender.connected());
    drop(sender);

    assert_eq!(handle.join().unwrap().unwrap(), 2);
}

#[test]
fn serves_several_senders() {
    let temp = TempDir::new("server").unwrap();
    let ipc = Ipc::new(SocketDir::new(temp.path()));
    let server = ipc.listen(&name("hub"), config());

    let handle = thread::spawn(move || {
        server.listen(0, |_, continuation| {
            let seen = continuation.carry() + 1;
            if seen == 6 {
                Ok(continuation.stop(seen))
            } else {
                Ok(continuation.continue_with(seen))
            }
        })
    });

    assert!(ipc.wait(&name("hub"), WAIT).is_some());
    let mut first = ipc.sender(name("first"), &name("hub"), client_config());
    let mut second = ipc.sender(name("second"), &name("hub"), client_config());
    for i in 0..3 {
        first.send(&text(&format!("first {i}"))).unwrap();
        second.send(&text(&format!("second {i}"))).unwrap();
    }
    drop(first);
    drop(second);

    assert_eq!(handle.join().unwrap().unwrap(), 6);
}

#[test]
fn callback_error_stops_the_server() {
    let temp = TempDir::new("server").unwrap();
    let ipc = Ipc::new(SocketDir::new(temp.path()));
    let server = ipc.listen(&name("fragile"), config());

    let handle = thread::spawn(move || {
        server.listen((), |_, _| Err("can't handle this".into()))
    });

    assert!(ipc.wait(&name("fragile"), WAIT).is_some());
    let mut sender = ipc.sender(name("client"), &name("fragile"), client_config());
    sender.send(&text("anything")).unwrap();

    assert!(matches!(
        handle.join().unwrap(),
        Err(ServerError::Callback(e)) if e.to_string() == "can't handle this"
    ));
    assert!(!ipc.exists(&name("fragile")));
}

#[test]
fn receiver_returns_once_the_server_closes() {
    let temp = TempDir::new("server").unwrap();
    let ipc = Ipc::new(SocketDir::new(temp.path()));
    let server = ipc.listen(
        &name("quiet"),
        config().with_timeout(Duration::from_millis(200)),
    );

    let handle = thread::spawn(move || server.listen(0, |_, continuation| Ok(continuation)));

    assert!(ipc.wait(&name("quiet"), WAIT).is_some());
    let receiver = ipc.receiver(name("client"), &name("quiet"), client_config());
    let mut received = 0;
    receiver
        .listen(|_, _| {
            received += 1;
            Ok(ControlFlow::Continue(()))
        })
        .unwrap();

    assert_eq!(received, 0);
    assert_eq!(handle.join().unwrap().unwrap(), 0);
}

#[test]
fn receiver_fails_without_a_server() {
    let temp = TempDir::new("server").unwrap();
    let receiver = Receiver::new(
        name("client"),
        SocketDir::new(temp.path()).address(&name("nobody")),
        client_config(),
    );

    assert!(matches!(
        receiver.listen(|_, _| Ok(ControlFlow::Continue(()))),
        Err(ClientError::Transport(_))
    ));
}

#[test]
fn stale_socket_is_replaced() {
    let temp = TempDir::new("server").unwrap();
    let ipc = Ipc::new(SocketDir::new(temp.path()));
    let address = ipc.address(&name("stale"));
    drop(UnixListener::bind(address.path()).unwrap());
    assert!(ipc.exists(&name("stale")));

    let server = ipc.listen(
        &name("stale"),
        config().with_timeout(Duration::from_millis(50)),
    );

    assert_eq!(server.listen(1, |_, continuation| Ok(continuation)).unwrap(), 1);
    assert!(!ipc.exists(&name("stale")));
}

#[test]
fn live_socket_is_kept() {
    let temp = TempDir::new("server").unwrap();
    let ipc = Ipc::new(SocketDir::new(temp.path()));
    let address = ipc.address(&name("taken"));
    let _listener = UnixListener::bind(address.path()).unwrap();

    let server = ipc.listen(&name("taken"), config());

    assert!(matches!(
        server.listen((), |_, continuation| Ok(continuation)),
        Err(ServerError::Io(e)) if e.kind() == io::ErrorKind::AddrInUse
    ));
    assert!(ipc.exists(&name("taken")));
}

#[test]
fn stalled_peer_does_not_block_other_senders() {
    let temp = TempDir::new("server").unwrap();
    let ipc = Ipc::new(SocketDir::new(temp.path()));
    let server = ipc.listen(&name("patient"), config());

    let handle = thread::spawn(move || {
        server.listen(0, |_, continuation| {
            let seen = continuation.carry() + 1;
            Ok(continuation.stop(seen))
        })
    });

    assert!(ipc.wait(&name("patient"), WAIT).is_some());
    // three bytes of a frame header, then silence
    let mut stalled = UnixStream::connect(ipc.address(&name("patient")).path()).unwrap();
    stalled.write_all(&[0, 10, b't']).unwrap();
    thread::sleep(Duration::from_millis(100));

    let mut sender = ipc.sender(name("client"), &name("patient"), client_config());
    sender.send(&text("hello")).unwrap();
    drop(sender);

    assert_eq!(handle.join().unwrap().unwrap(), 1);
    drop(stalled);
}

#[test]
fn listen_keeps_directory_permissions() {
    let temp = TempDir::new("server").unwrap();
    fs::set_permissions(temp.path(), fs::Permissions::from_mode(0o755)).unwrap();
    let ipc = Ipc::new(SocketDir::new(temp.path()));
    let server = ipc.listen(
        &name("shared"),
        config().with_timeout(Duration::from_millis(50)),
    );

    server.listen((), |_, continuation| Ok(continuation)).unwrap();

    let mode = fs::metadata(temp.path()).unwrap().permissions().mode() & 0o777;
    assert_eq!(mode, 0o755);
}
