//! Integration tests for the posixd runtime

use posixd::{DaemonConfig, DaemonRuntime};
use services_posix::ServerConfig;

fn run_script(script: &str) -> DaemonRuntime {
    let config = DaemonConfig {
        server: ServerConfig {
            workers: 2,
            ..ServerConfig::default()
        },
        script: Some(script.to_string()),
        ..DaemonConfig::default()
    };
    let mut runtime = DaemonRuntime::new(config).unwrap();
    runtime.run().unwrap();
    runtime
}

#[test]
fn test_pipe_demo_script() {
    let mut runtime = run_script(include_str!("../../demos/pipe_echo.posix"));
    let transcript = runtime.transcript().to_vec();

    assert!(transcript.iter().any(|line| line.ends_with("-> 12 bytes")));
    assert!(transcript.iter().any(|line| line.ends_with("-> 0x000c")));
    assert!(transcript
        .iter()
        .any(|line| line.ends_with("-> \"hello, pipe\\n\"")));
    assert!(transcript.iter().any(|line| line.ends_with("-> eof")));

    // A linked pipe without writers waits for the next writer.
    assert!(transcript
        .iter()
        .any(|line| line.contains("read fifo 8 nonblock -> error: operation would block")));
    assert!(!runtime.published().contains(&"/tmp/fifo".to_string()));

    runtime.shutdown();
}

#[test]
fn test_events_demo_script() {
    let mut runtime = run_script(include_str!("../../demos/events.posix"));
    let transcript = runtime.transcript().to_vec();

    assert!(transcript.iter().any(|line| line.ends_with("-> [p data-in x4]")));
    assert!(transcript.iter().any(|line| line.ends_with("-> [n error x2]")));
    assert!(transcript
        .iter()
        .any(|line| line.ends_with("-> error: timed out")));
    assert!(transcript.iter().any(|line| line.ends_with("-> \"ls\\n\"")));

    runtime.shutdown();
}

#[test]
fn test_shutdown_answers_parked_requests() {
    let mut runtime = run_script("pipe p\nread p 4");
    assert!(runtime
        .transcript()
        .iter()
        .any(|line| line.ends_with("still parked")));

    runtime.shutdown();
    assert!(runtime.published().is_empty());
    assert!(runtime.server().context().registry().is_empty());
}
