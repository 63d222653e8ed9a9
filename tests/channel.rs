// Copyright 2019 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::net::TcpListener;
use std::process::{Child, Command, Output};
use std::thread::sleep;
use std::time::Duration;

use pretty_assertions::assert_eq;

const KRAKEN: &str = env!("CARGO_BIN_EXE_kraken");

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn kraken(args: &[&str]) -> Output {
    Command::new(KRAKEN).args(args).output().unwrap()
}

fn wait_for_exit(server: &mut Child) -> Option<i32> {
    for _ in 0..100 {
        if let Some(status) = server.try_wait().unwrap() {
            return status.code();
        }
        sleep(Duration::from_millis(50));
    }

    server.kill().ok();
    panic!("server did not stop");
}

#[test]
fn test_send_then_stop() {
    let port = format!("--port={}", free_port());
    let host = "--host=127.0.0.1";

    let mut server = Command::new(KRAKEN)
        .args(["start", host, port.as_str()])
        .spawn()
        .unwrap();

    // retry until the server is listening
    let mut output = kraken(&["send", "--text=hello", host, &port]);
    for _ in 0..100 {
        if output.status.success() {
            break;
        }
        sleep(Duration::from_millis(50));
        output = kraken(&["send", "--text=hello", host, &port]);
    }
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert_eq!(String::from_utf8_lossy(&output.stdout), "Response\n");

    let output = kraken(&["STOP", host, &port]);
    assert!(output.status.success());
    assert_eq!(wait_for_exit(&mut server), Some(0));
}

#[test]
fn test_send_without_server() {
    let port = format!("--port={}", free_port());
    let output = kraken(&["send", "--text=hello", "--host=127.0.0.1", &port]);
    assert_eq!(output.status.code(), Some(40));
}
