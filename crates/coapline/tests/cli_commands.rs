#![cfg(feature = "cli")]

use std::net::{SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

fn free_tcp_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").expect("ephemeral bind should succeed");
    listener.local_addr().expect("local addr")
}

fn wait_for_connect(addr: SocketAddr, timeout: Duration) {
    let start = Instant::now();
    loop {
        if TcpStream::connect_timeout(&addr, Duration::from_millis(100)).is_ok() {
            return;
        }
        if start.elapsed() >= timeout {
            panic!("connect timeout");
        }
        thread::sleep(Duration::from_millis(25));
    }
}

fn spawn_server(addr: SocketAddr, extra: &[&str]) -> Child {
    Command::new(env!("CARGO_BIN_EXE_coapline"))
        .arg("--log-level")
        .arg("error")
        .arg("serve")
        .arg(addr.to_string())
        .arg("--network")
        .arg("tcp")
        .args(extra)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .expect("serve command should start")
}

#[test]
fn tcp_send_against_echo_server_prints_response() {
    let addr = free_tcp_addr();
    let mut child = spawn_server(addr, &[]);
    wait_for_connect(addr, Duration::from_secs(3));

    let output = Command::new(env!("CARGO_BIN_EXE_coapline"))
        .arg("--log-level")
        .arg("error")
        .arg("--format")
        .arg("json")
        .arg("send")
        .arg(addr.to_string())
        .arg("--network")
        .arg("tcp")
        .arg("--method")
        .arg("post")
        .arg("--path")
        .arg("/echo")
        .arg("--data")
        .arg("Content sent by client")
        .arg("--content-format")
        .arg("0")
        .output()
        .expect("send should run");

    let _ = child.kill();
    let _ = child.wait();

    assert!(output.status.success(), "{output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"code\":\"2.05 Content\""), "{stdout}");
    assert!(stdout.contains("\"payload\":\"Content sent by client\""), "{stdout}");
    assert!(stdout.contains("\"name\":\"Content-Format\""), "{stdout}");
}

#[test]
fn unrouted_path_gets_not_found() {
    let addr = free_tcp_addr();
    let mut child = spawn_server(addr, &["--route", "/only"]);
    wait_for_connect(addr, Duration::from_secs(3));

    let output = Command::new(env!("CARGO_BIN_EXE_coapline"))
        .arg("--log-level")
        .arg("error")
        .arg("--format")
        .arg("json")
        .arg("send")
        .arg(addr.to_string())
        .arg("--network")
        .arg("tcp")
        .arg("--path")
        .arg("/elsewhere")
        .output()
        .expect("send should run");

    let _ = child.kill();
    let _ = child.wait();

    assert!(output.status.success(), "{output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"code\":\"4.04 Not Found\""), "{stdout}");
}

#[test]
fn udp_send_to_silent_peer_returns_124() {
    let silent = UdpSocket::bind("127.0.0.1:0").expect("udp bind should succeed");
    let addr = silent.local_addr().expect("local addr");

    let output = Command::new(env!("CARGO_BIN_EXE_coapline"))
        .arg("--log-level")
        .arg("error")
        .arg("send")
        .arg(addr.to_string())
        .arg("--ack-timeout")
        .arg("20ms")
        .arg("--max-retransmit")
        .arg("1")
        .output()
        .expect("send should run");

    assert_eq!(output.status.code(), Some(124));
    drop(silent);
}

#[test]
fn invalid_route_returns_usage() {
    let addr = free_tcp_addr();
    let output = Command::new(env!("CARGO_BIN_EXE_coapline"))
        .arg("serve")
        .arg(addr.to_string())
        .arg("--route")
        .arg("/")
        .output()
        .expect("serve should run");

    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn invalid_token_returns_usage() {
    let output = Command::new(env!("CARGO_BIN_EXE_coapline"))
        .arg("send")
        .arg("127.0.0.1:9")
        .arg("--token")
        .arg("xyz")
        .output()
        .expect("send should run");

    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn version_prints_name() {
    let output = Command::new(env!("CARGO_BIN_EXE_coapline"))
        .arg("version")
        .arg("--extended")
        .output()
        .expect("version should run");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("name: coapline"));
    assert!(stdout.contains("transports: udp"));
    assert!(stdout.contains("profile: "));
    assert!(stdout.contains("max_datagram: 65535"));
}
