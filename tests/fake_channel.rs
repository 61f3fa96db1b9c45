use std::error::Error;
use std::sync::{Arc, Mutex};

use cmdstream::errors::CmdstreamError;
use cmdstream::exec::{ChannelFactory, ChannelState, Command, CommandChannel, RunOutcome};
use cmdstream::history::{CommandStatus, HistoryBuffer, HistoryCaps, SharedHistory};
use cmdstream::report::ErrorOutput;
use cmdstream_test_utils::builders::FrameBuilder;
use cmdstream_test_utils::fake_channel::FakeChannelFactory;
use cmdstream_test_utils::{init_tracing, with_timeout};
use serde_json::json;

type TestResult = Result<(), Box<dyn Error>>;

/// Caller-side code written against the trait only.
async fn run_collecting_errors(
    factory: &dyn ChannelFactory,
    line: &str,
) -> (Result<RunOutcome, CmdstreamError>, Vec<String>) {
    let general = Arc::new(Mutex::new(Vec::new()));
    let mut channel: Box<dyn CommandChannel> = factory.create(Command::new(line));
    {
        let general = general.clone();
        channel
            .reports()
            .on_error(move |report| general.lock().unwrap().push(report.data.message.clone()));
    }
    let result = channel.run().await.map(|report| report.outcome);
    let seen = general.lock().unwrap().clone();
    (result, seen)
}

#[tokio::test]
async fn end_of_stream_stops_the_script() -> TestResult {
    init_tracing();
    let factory = FakeChannelFactory::new(
        vec![
            FrameBuilder::new("stream").data(json!({ "v": 1 })).build(),
            FrameBuilder::eof().build(),
            FrameBuilder::new("stream").data(json!({ "v": 2 })).build(),
        ],
        Some(1),
    );

    let mut channel = factory.create(Command::new("content sync"));
    let report = with_timeout(channel.run()).await?;

    assert_eq!(report.outcome, RunOutcome::EndOfStream);
    assert_eq!(report.frames, 2);
    assert_eq!(channel.state(), ChannelState::Completed);
    assert_eq!(factory.created(), vec!["content sync".to_string()]);
    Ok(())
}

#[tokio::test]
async fn general_error_callback_sees_untargeted_errors() -> TestResult {
    init_tracing();
    let factory = FakeChannelFactory::new(
        vec![
            FrameBuilder::error("errorQuota", "over quota").build(),
            FrameBuilder::error("error", "generic").build(),
        ],
        Some(0),
    );

    let (result, seen) = with_timeout(run_collecting_errors(&factory, "services deploy")).await;
    assert_eq!(result?, RunOutcome::Succeeded);
    assert_eq!(seen, vec!["over quota", "generic"]);
    Ok(())
}

#[tokio::test]
async fn specific_callback_wins_over_general_one() -> TestResult {
    init_tracing();
    let factory = FakeChannelFactory::new(
        vec![
            FrameBuilder::error("errorQuota", "over quota").build(),
            FrameBuilder::error("errorNet", "offline").build(),
        ],
        Some(0),
    );

    let specific = Arc::new(Mutex::new(Vec::new()));
    let general = Arc::new(Mutex::new(Vec::new()));
    let mut channel = factory.create(Command::new("services deploy"));
    {
        let specific = specific.clone();
        channel
            .reports()
            .on::<ErrorOutput, _>("errorQuota", move |p| {
                specific.lock().unwrap().push(p.data.message)
            });
    }
    {
        let general = general.clone();
        channel
            .reports()
            .on_error(move |r| general.lock().unwrap().push(r.data.message.clone()));
    }
    let report = with_timeout(channel.run()).await?;

    assert_eq!(*specific.lock().unwrap(), vec!["over quota"]);
    assert_eq!(*general.lock().unwrap(), vec!["offline"]);
    assert_eq!(report.errors.len(), 2);
    Ok(())
}

#[tokio::test]
async fn scripted_failure_carries_errors_and_closes_history() -> TestResult {
    init_tracing();
    let history = SharedHistory::new(HistoryBuffer::new(HistoryCaps {
        commands: 1,
        logs: 10,
        server_events: 10,
    }));
    let factory = FakeChannelFactory::new(
        vec![
            FrameBuilder::log("Warning", "slow network").build(),
            FrameBuilder::error("errorUpload", "timed out").ts(1_700_000_000_000).build(),
        ],
        Some(2),
    )
    .with_history(history.clone());

    let (first, _) = with_timeout(run_collecting_errors(&factory, "content publish")).await;
    let Err(CmdstreamError::InvocationFailed(failure)) = first else {
        panic!("expected invocation failure");
    };
    assert_eq!(failure.exit_code, 2);
    assert_eq!(failure.command, "content publish");
    assert_eq!(failure.errors.len(), 1);
    assert_eq!(failure.errors[0].ts, Some(1_700_000_000_000));
    assert!(failure.to_string().contains("timed out"));

    let (second, _) = with_timeout(run_collecting_errors(&factory, "content publish --force")).await;
    assert!(second.is_err());

    history.with(|h| {
        assert_eq!(h.len(), 2);
        for desc in h.commands() {
            assert_eq!(desc.status(), CommandStatus::Done);
            assert_eq!(desc.exit_code, Some(2));
            assert_eq!(desc.logs[1].log_level, "Error");
            assert_eq!(desc.logs[1].timestamp, Some(1_700_000_000_000));
        }

        let snapshot = h.snapshot();
        assert_eq!(snapshot.commands.len(), 1);
        assert_eq!(snapshot.commands[0].command_string, "content publish --force");
        assert_eq!(
            snapshot.commands[0].arguments(),
            vec![("force".to_string(), "true".to_string())]
        );
    });
    Ok(())
}

#[tokio::test]
async fn trait_channels_share_the_single_use_guard() -> TestResult {
    init_tracing();
    let factory = FakeChannelFactory::new(vec![FrameBuilder::eof().build()], Some(0));

    let mut channel = factory.create(Command::new("project ps"));
    with_timeout(channel.run()).await?;
    assert!(channel.command().has_started());

    let again = with_timeout(channel.run()).await;
    assert!(matches!(again, Err(CmdstreamError::AlreadyExecuted)));
    assert!(matches!(
        channel.command_mut().set_line("project ps --all"),
        Err(CmdstreamError::AlreadyExecuted)
    ));

    let mut blank = factory.create(Command::new("   "));
    assert!(matches!(
        with_timeout(blank.run()).await,
        Err(CmdstreamError::EmptyCommand)
    ));
    assert!(!blank.command().has_started());

    let mut direct = Command::new("content sync");
    direct.begin()?;
    assert!(matches!(direct.begin(), Err(CmdstreamError::AlreadyExecuted)));
    Ok(())
}
