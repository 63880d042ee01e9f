//! Session state-machine tests against a scripted spawner.
//!
//! Exercises the `(child present?, action)` dispatch table over an
//! in-memory transport: validation errors, spawn failures, the stdin
//! forwarding overload, swallowed control errors, and the return to idle
//! after a child lifecycle.

use std::sync::Arc;

use shell_relay::process::Spawner;

use super::test_helpers::{start_session, ScriptedProcess, ScriptedSpawner};

/// A request without an `Action` is answered with the fixed error text and
/// leaves the session usable.
#[tokio::test]
async fn missing_action_keeps_session_idle() {
    let spawner = Arc::new(ScriptedSpawner::default());
    let mut client = start_session(spawner);

    client.send("{}").await;
    let frame = client.recv().await;
    assert_eq!(frame.result.as_deref(), Some("required field 'Action'"));

    // The session is still alive and still idle.
    client.send(r#"{"Action":"RESIZE","TermCols":80}"#).await;
    let frame = client.recv().await;
    assert_eq!(frame.result.as_deref(), Some("no running process"));
}

/// Control actions while no child exists report `no running process`.
#[tokio::test]
async fn control_actions_while_idle_are_rejected() {
    let spawner = Arc::new(ScriptedSpawner::default());
    let mut client = start_session(spawner);

    client
        .send(r#"{"Action":"RESIZE","TermCols":80,"TermRows":24}"#)
        .await;
    assert_eq!(
        client.recv().await.result.as_deref(),
        Some("no running process")
    );

    client.send(r#"{"Action":"SIGNAL","Signal":15}"#).await;
    assert_eq!(
        client.recv().await.result.as_deref(),
        Some("no running process")
    );
}

/// FORK and EXEC both require a non-empty `Argv`.
#[tokio::test]
async fn spawn_actions_without_argv_are_rejected() {
    let spawner = Arc::new(ScriptedSpawner::default());
    let mut client = start_session(spawner);

    client.send(r#"{"Action":"FORK","TermName":"xterm"}"#).await;
    assert_eq!(
        client.recv().await.result.as_deref(),
        Some("missing required field 'Argv'")
    );

    client.send(r#"{"Action":"EXEC"}"#).await;
    assert_eq!(
        client.recv().await.result.as_deref(),
        Some("missing required field 'Argv'")
    );
}

/// Each factory failure is reported with its fixed result string and the
/// session stays idle, so the next spawn attempt goes through the factory
/// again.
#[tokio::test]
async fn spawn_failures_report_fixed_results() {
    let spawner = Arc::new(ScriptedSpawner::default());
    // Exhausted scripted spawner fails every factory call.
    let mut client = start_session(Arc::clone(&spawner) as Arc<dyn Spawner>);

    client.send(r#"{"Action":"FORK","Argv":["/bin/sh"]}"#).await;
    assert_eq!(
        client.recv().await.result.as_deref(),
        Some("unable to fork pty")
    );

    client.send(r#"{"Action":"OPEN","TermCols":80}"#).await;
    assert_eq!(
        client.recv().await.result.as_deref(),
        Some("unable to open pty")
    );

    client.send(r#"{"Action":"EXEC","Argv":["/bin/ls"]}"#).await;
    assert_eq!(
        client.recv().await.result.as_deref(),
        Some("unable to run exec")
    );
}

/// The FORK terminal parameters travel into the factory's spec block.
#[tokio::test]
async fn fork_passes_terminal_parameters() {
    let spawner = Arc::new(ScriptedSpawner::default());
    let (process, handles) = ScriptedProcess::new(Ok(()), false);
    spawner.push(Ok(Box::new(process)));

    let mut client = start_session(Arc::clone(&spawner) as Arc<dyn Spawner>);
    client
        .send(
            r#"{"Action":"FORK","Argv":["/bin/sh","-l"],"TermName":"xterm","TermCwd":"/tmp","TermCols":120,"TermRows":40,"TermUid":1000,"TermGid":1000,"TermEnv":{"LANG":"C"}}"#,
        )
        .await;

    // End the lifecycle so the exit frame proves the spawn happened.
    drop(handles.stdout);
    drop(handles.stderr);
    let frames = client.recv_until_result().await;
    assert_eq!(frames.last().unwrap().result.as_deref(), Some("0"));

    let specs = spawner.fork_specs.lock().unwrap();
    assert_eq!(specs.len(), 1, "exactly one fork must reach the factory");
    let spec = &specs[0];
    assert_eq!(spec.file, "/bin/sh");
    assert_eq!(spec.args, vec!["-l".to_owned()]);
    assert_eq!(spec.name, "xterm");
    assert_eq!(spec.cwd, "/tmp");
    assert_eq!(spec.cols, Some(120));
    assert_eq!(spec.rows, Some(40));
    assert_eq!(spec.uid, Some(1000));
    assert_eq!(spec.gid, Some(1000));
    assert_eq!(spec.env.get("LANG").map(String::as_str), Some("C"));
}

/// Once a child exists, EXEC forwards the space-joined argv to its stdin
/// with no trailing newline and echoes it back.
#[tokio::test]
async fn busy_exec_forwards_stdin_and_echoes() {
    let spawner = Arc::new(ScriptedSpawner::default());
    let (process, handles) = ScriptedProcess::new(Ok(()), false);
    spawner.push(Ok(Box::new(process)));

    let mut client = start_session(Arc::clone(&spawner) as Arc<dyn Spawner>);
    client.send(r#"{"Action":"FORK","Argv":["/bin/sh"]}"#).await;
    client
        .send(r#"{"Action":"EXEC","Argv":["echo","hi"]}"#)
        .await;

    let frame = client.recv().await;
    assert_eq!(frame.stdin.as_deref(), Some("echo hi"));

    let log = handles.log.lock().unwrap();
    assert_eq!(
        log.stdin, b"echo hi",
        "stdin must receive the joined argv with no trailing newline"
    );
}

/// A stdin write failure produces the fixed error frame and the session
/// carries on.
#[tokio::test]
async fn busy_stdin_failure_is_reported() {
    let spawner = Arc::new(ScriptedSpawner::default());
    let (process, _handles) = ScriptedProcess::new(Ok(()), true);
    spawner.push(Ok(Box::new(process)));

    let mut client = start_session(Arc::clone(&spawner) as Arc<dyn Spawner>);
    client.send(r#"{"Action":"FORK","Argv":["/bin/sh"]}"#).await;
    client
        .send(r#"{"Action":"EXEC","Argv":["echo","hi"]}"#)
        .await;

    let frame = client.recv().await;
    assert_eq!(frame.result.as_deref(), Some("message failed to send"));
}

/// RESIZE and SIGNAL are forwarded to the running child; their errors (and
/// their successes) produce no response frames.
#[tokio::test]
async fn busy_resize_and_signal_are_forwarded_silently() {
    let spawner = Arc::new(ScriptedSpawner::default());
    let (process, handles) = ScriptedProcess::new(Ok(()), false);
    spawner.push(Ok(Box::new(process)));

    let mut client = start_session(Arc::clone(&spawner) as Arc<dyn Spawner>);
    client.send(r#"{"Action":"FORK","Argv":["/bin/sh"]}"#).await;
    client
        .send(r#"{"Action":"RESIZE","TermCols":100,"TermRows":40}"#)
        .await;
    client.send(r#"{"Action":"SIGNAL","Signal":9}"#).await;

    // A subsequent echo proves the silent requests were already dispatched.
    client.send(r#"{"Action":"EXEC","Argv":["ping"]}"#).await;
    let frame = client.recv().await;
    assert_eq!(
        frame.stdin.as_deref(),
        Some("ping"),
        "first frame after silent controls must be the stdin echo"
    );

    let log = handles.log.lock().unwrap();
    assert_eq!(log.resize_calls, vec![(Some(100), Some(40))]);
    assert_eq!(log.kill_calls, vec![Some(9)]);
}

/// A spawn request while a child is already running is ignored outright.
#[tokio::test]
async fn busy_spawn_requests_are_ignored() {
    let spawner = Arc::new(ScriptedSpawner::default());
    let (process, _handles) = ScriptedProcess::new(Ok(()), false);
    spawner.push(Ok(Box::new(process)));

    let mut client = start_session(Arc::clone(&spawner) as Arc<dyn Spawner>);
    client.send(r#"{"Action":"FORK","Argv":["/bin/sh"]}"#).await;
    client.send(r#"{"Action":"FORK","Argv":["/bin/sh"]}"#).await;
    client.send(r#"{"Action":"OPEN"}"#).await;

    // No error frames for the ignored spawns; the echo is the next frame.
    client.send(r#"{"Action":"EXEC","Argv":["hello"]}"#).await;
    let frame = client.recv().await;
    assert_eq!(frame.stdin.as_deref(), Some("hello"));

    let specs = spawner.fork_specs.lock().unwrap();
    assert_eq!(specs.len(), 1, "the busy FORK must never reach the factory");
}

/// After the exit frame the session is idle again and accepts a new spawn:
/// the child slot count over the trace never exceeds one.
#[tokio::test]
async fn child_exit_returns_session_to_idle() {
    let spawner = Arc::new(ScriptedSpawner::default());
    let (first, first_handles) = ScriptedProcess::new(Ok(()), false);
    let (second, second_handles) = ScriptedProcess::new(Ok(()), false);
    spawner.push(Ok(Box::new(first)));
    spawner.push(Ok(Box::new(second)));

    let mut client = start_session(Arc::clone(&spawner) as Arc<dyn Spawner>);

    client.send(r#"{"Action":"FORK","Argv":["/bin/sh"]}"#).await;
    first_handles.stdout.send(b"one\n".to_vec()).unwrap();
    drop(first_handles.stdout);
    drop(first_handles.stderr);
    let frames = client.recv_until_result().await;
    assert_eq!(frames.last().unwrap().result.as_deref(), Some("0"));

    // The exit frame is enqueued before the slot is released; wait for the
    // close call so the next spawn is guaranteed to find the session idle.
    let mut closed = false;
    for _ in 0..500 {
        if first_handles.log.lock().unwrap().close_calls == 1 {
            closed = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert!(closed, "first child must be closed exactly once");

    client.send(r#"{"Action":"FORK","Argv":["/bin/sh"]}"#).await;
    second_handles.stdout.send(b"two\n".to_vec()).unwrap();
    let frame = client.recv().await;
    assert_eq!(
        frame.stdout.as_deref(),
        Some("two\n"),
        "the second lifecycle must stream output again"
    );

    let specs = spawner.fork_specs.lock().unwrap();
    assert_eq!(specs.len(), 2, "both forks must reach the factory");
}

/// Output frames flow from the scripted child through to the transport in
/// order, stdout and stderr each line-framed on their own stream.
#[tokio::test]
async fn child_output_streams_through_in_order() {
    let spawner = Arc::new(ScriptedSpawner::default());
    let (process, handles) = ScriptedProcess::new(Ok(()), false);
    spawner.push(Ok(Box::new(process)));

    let mut client = start_session(Arc::clone(&spawner) as Arc<dyn Spawner>);
    client.send(r#"{"Action":"FORK","Argv":["/bin/sh"]}"#).await;

    handles.stdout.send(b"first\n".to_vec()).unwrap();
    let frame = client.recv().await;
    assert_eq!(frame.stdout.as_deref(), Some("first\n"));

    handles.stderr.send(b"oops\n".to_vec()).unwrap();
    let frame = client.recv().await;
    assert_eq!(frame.stderr.as_deref(), Some("oops\n"));

    handles.stdout.send(b"second\n".to_vec()).unwrap();
    let frame = client.recv().await;
    assert_eq!(frame.stdout.as_deref(), Some("second\n"));
}
