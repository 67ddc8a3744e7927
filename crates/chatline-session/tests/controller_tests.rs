//! Controller tests against the scripted transport.

use std::time::Duration;

use chatline_engine::{ChatError, FailureKind};
use chatline_models::ModelRegistry;
use chatline_runtime::{MockTransport, SpeedConfig, SpeedReport, SpeedUnit};
use chatline_session::{
    ChatView, Controller, DialogueMode, SessionPolicy, SessionState, StopHandle, Turn,
    FEW_SHOT_EXAMPLE,
};

const REGISTRY_TOML: &str = r#"
[[families]]
name = "Test"

[[families.models]]
backend = { repository = "test/bloom" }
frontend = { name = "Test BLOOM", model_card = "https://example.org/bloom" }

[families.models.chat]
max_session_length = 2048
sep_token = "\n\n"
stop_token = "\n\n"
generation_params = { do_sample = true, temperature = 0.9, top_k = 40 }

[[families.models]]
backend = { repository = "test/bloomz", aliases = ["bloomz"] }
frontend = { name = "Test BLOOMZ", model_card = "https://example.org/bloomz" }

[families.models.chat]
max_session_length = 8192
sep_token = "\n\n"
stop_token = "</s>"
extra_stop_sequences = ["\n\nHuman"]
"#;

#[derive(Default)]
struct Recorder {
    started: Vec<Turn>,
    texts: Vec<String>,
    speeds: Vec<SpeedReport>,
    finished: Vec<(String, bool)>,
    retries: Vec<FailureKind>,
    errors: Vec<ChatError>,
    error_kinds: Vec<FailureKind>,
    /// Request a stop once this many text updates were seen.
    stop_after: Option<(usize, StopHandle)>,
}

impl ChatView for Recorder {
    fn on_turn_started(&mut self, turn: &Turn) {
        self.started.push(turn.clone());
    }

    fn on_text(&mut self, text: &str, _fragment: &str) {
        self.texts.push(text.to_string());
        if let Some((n, handle)) = &self.stop_after {
            if self.texts.len() == *n {
                handle.request_stop();
            }
        }
    }

    fn on_speed(&mut self, report: &SpeedReport) {
        self.speeds.push(*report);
    }

    fn on_turn_finished(&mut self, turn: &Turn, stopped_by_user: bool) {
        self.finished.push((turn.text.clone(), stopped_by_user));
    }

    fn on_retry(&mut self, kind: FailureKind, _attempt: usize) {
        self.retries.push(kind);
    }

    fn on_error(&mut self, error: &ChatError, kind: FailureKind) {
        self.errors.push(error.clone());
        self.error_kinds.push(kind);
    }
}

fn registry() -> ModelRegistry {
    ModelRegistry::from_toml_str(REGISTRY_TOML).unwrap()
}

fn controller_with(
    mock: &MockTransport,
    policy: SessionPolicy,
) -> Controller<MockTransport, Recorder> {
    Controller::with_view(mock.clone(), registry(), Recorder::default(), policy)
}

fn controller(mock: &MockTransport) -> Controller<MockTransport, Recorder> {
    controller_with(mock, SessionPolicy::default())
}

#[tokio::test]
async fn test_reply_is_streamed_and_stripped() {
    let mock = MockTransport::new();
    mock.push_step("Hello", false).push_step(" there\n\n", true);
    let mut ctl = controller(&mock);

    let outcome = ctl.submit("Hi").await.unwrap();
    assert_eq!(outcome.text, "Hello there");
    assert!(!outcome.stopped_by_user);
    assert_eq!(outcome.metrics.steps, 2);

    let opens = mock.opens();
    assert_eq!(opens.len(), 1);
    assert_eq!(opens[0].model, "test/bloom");
    assert_eq!(opens[0].max_length, 1024);

    let generates = mock.generates();
    assert_eq!(generates.len(), 1);
    assert_eq!(generates[0].inputs.as_deref(), Some("Human: Hi\n\nAI:"));
    assert_eq!(generates[0].max_new_tokens, 1);
    assert_eq!(generates[0].stop_sequence.as_deref(), Some("\n\n"));
    assert_eq!(generates[0].params.top_k, Some(40));

    let turns = ctl.transcript().turns();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].rendered(), "Human: Hi");
    assert_eq!(turns[1].rendered(), "AI:Hello there");

    let view = ctl.view();
    assert_eq!(view.started.len(), 1);
    assert_eq!(view.texts, vec!["Hello", "Hello there"]);
    assert_eq!(view.finished, vec![("Hello there".to_string(), false)]);
}

#[tokio::test]
async fn test_completion_keeps_session_and_sends_suffix() {
    let mock = MockTransport::new();
    mock.push_step("Hello there\n\n", true)
        .push_step("Fine", false)
        .push_step("\n\n", true);
    let mut ctl = controller(&mock);

    ctl.submit("Hi").await.unwrap();
    assert_eq!(ctl.state(), SessionState::Ready);
    assert!(ctl.is_awaiting_input());
    assert_eq!(ctl.position(), 2);

    let outcome = ctl.submit("How are you?").await.unwrap();
    assert_eq!(outcome.text, "Fine");
    assert_eq!(ctl.position(), 4);

    assert_eq!(mock.opens().len(), 1);
    assert_eq!(mock.close_count(), 0);
    assert_eq!(
        mock.generates()[1].inputs.as_deref(),
        Some("Human: How are you?\n\nAI:")
    );
    let session = ctl.session().unwrap();
    assert_eq!(session.tokens, 3);
}

#[tokio::test]
async fn test_expired_session_resends_whole_transcript() {
    let mock = MockTransport::new();
    mock.push_step("Hel", false)
        .push_backend_error("Session 4f2a expired")
        .push_step("lo\n\n", true);
    let mut ctl = controller(&mock);

    let outcome = ctl.submit("Hi").await.unwrap();
    assert_eq!(outcome.text, "Hello");

    assert_eq!(mock.opens().len(), 2);
    assert_eq!(mock.opens()[1].max_length, 1024);
    let generates = mock.generates();
    assert_eq!(generates.len(), 2);
    // Cursor went back to 0, so the partial reply is resent for continuation.
    assert_eq!(generates[1].inputs.as_deref(), Some("Human: Hi\n\nAI:Hel"));
    assert_eq!(ctl.view().retries, vec![FailureKind::SessionExpired]);
    assert!(ctl.view().errors.is_empty());
    assert!(mock.close_count() >= 1);
}

#[tokio::test]
async fn test_expiry_on_open_is_retried() {
    let mock = MockTransport::new();
    mock.push_open(Err(ChatError::Backend("Session 11 expired".into())))
        .push_step("Ok\n\n", true);
    let mut ctl = controller(&mock);

    assert_eq!(ctl.submit("Hi").await.unwrap().text, "Ok");
    assert_eq!(mock.opens().len(), 2);
    assert_eq!(mock.generates().len(), 1);
}

#[tokio::test]
async fn test_length_grows_to_ceiling_then_surfaces() {
    let mock = MockTransport::new();
    mock.push_backend_error("Maximum length exceeded")
        .push_backend_error("Maximum length exceeded");
    let mut ctl = controller(&mock);

    let err = ctl.submit("Tell me a long story").await.unwrap_err();
    assert_eq!(err, ChatError::Backend("Maximum length exceeded".into()));
    let lengths: Vec<usize> = mock.opens().iter().map(|o| o.max_length).collect();
    assert_eq!(lengths, vec![1024, 2048]);
    assert_eq!(ctl.max_length(), 2048);
    assert_eq!(ctl.state(), SessionState::Failed);
    assert_eq!(ctl.view().errors.len(), 1);

    // The grown budget survives the retry.
    mock.push_step("Once\n\n", true);
    ctl.retry().await.unwrap();
    assert_eq!(mock.opens()[2].max_length, 2048);
}

#[tokio::test]
async fn test_growth_uses_configured_factor() {
    let mock = MockTransport::new();
    mock.push_backend_error("Maximum length exceeded")
        .push_step("ok\n\n", true);
    let policy = SessionPolicy::default()
        .with_initial_max_length(512)
        .with_growth_factor(1.5);
    let mut ctl = controller_with(&mock, policy);

    ctl.submit("Hi").await.unwrap();
    let lengths: Vec<usize> = mock.opens().iter().map(|o| o.max_length).collect();
    assert_eq!(lengths, vec![512, 768]);
}

#[tokio::test]
async fn test_manual_stop_closes_session() {
    let mock = MockTransport::new();
    mock.push_step("Hello", false)
        .push_step(" there", false)
        .push_step(" friend", false);
    let mut ctl = controller(&mock);
    let handle = ctl.stop_handle();
    ctl.view_mut().stop_after = Some((1, handle));

    let outcome = ctl.submit("Hi").await.unwrap();
    assert_eq!(outcome.text, "Hello");
    assert!(outcome.stopped_by_user);
    assert_eq!(ctl.state(), SessionState::Idle);
    assert_eq!(ctl.position(), 0);
    assert!(ctl.session().is_none());
    assert_eq!(mock.close_count(), 1);
    assert_eq!(mock.remaining_steps(), 2);
    assert_eq!(ctl.view().finished, vec![("Hello".to_string(), true)]);
    assert!(!ctl.stop_handle().is_requested());

    // A new session gets the whole dialogue, earlier reply terminated.
    ctl.view_mut().stop_after = None;
    mock.push_step("Bye\n\n", true);
    let outcome = ctl.submit("Next").await.unwrap();
    assert_eq!(outcome.text, "Bye");
    assert_eq!(mock.opens().len(), 2);
    assert_eq!(
        mock.generates()[1].inputs.as_deref(),
        Some("Human: Hi\n\nAI:Hello\n\nHuman: Next\n\nAI:")
    );
}

#[tokio::test]
async fn test_stale_stop_request_is_ignored() {
    let mock = MockTransport::new();
    mock.push_step("One", false).push_step(" two\n\n", true);
    let mut ctl = controller(&mock);

    ctl.stop_handle().request_stop();
    let outcome = ctl.submit("Count").await.unwrap();
    assert_eq!(outcome.text, "One two");
    assert!(!outcome.stopped_by_user);
}

#[tokio::test]
async fn test_first_connection_failure_retried_once() {
    let mock = MockTransport::new();
    mock.push_step_error(ChatError::Closed).push_step("Hi!\n\n", true);
    let mut ctl = controller(&mock);

    assert_eq!(ctl.submit("Hello").await.unwrap().text, "Hi!");
    assert_eq!(mock.opens().len(), 2);
    assert_eq!(ctl.view().retries, vec![FailureKind::Transport]);
}

#[tokio::test]
async fn test_repeated_connection_failure_surfaces() {
    let mock = MockTransport::new();
    mock.push_open(Err(ChatError::Connection("refused".into())))
        .push_open(Err(ChatError::Connection("refused".into())));
    let mut ctl = controller(&mock);

    let err = ctl.submit("Hello").await.unwrap_err();
    assert_eq!(err, ChatError::Connection("refused".into()));
    assert_eq!(mock.opens().len(), 2);
    assert_eq!(ctl.view().retries.len(), 1);
    assert_eq!(ctl.view().errors.len(), 1);
    assert_eq!(ctl.state(), SessionState::Failed);
}

#[tokio::test]
async fn test_second_connection_drop_in_turn_surfaces() {
    let mock = MockTransport::new();
    mock.push_step("a", false)
        .push_step_error(ChatError::Closed)
        .push_step("b", false)
        .push_step_error(ChatError::Closed)
        .push_step("c\n\n", true);
    let mut ctl = controller(&mock);

    let err = ctl.submit("Hi").await.unwrap_err();
    assert_eq!(err, ChatError::Closed);
    assert_eq!(mock.opens().len(), 2);
    assert_eq!(ctl.view().retries, vec![FailureKind::Transport]);
    assert_eq!(ctl.view().errors, vec![ChatError::Closed]);
    assert_eq!(ctl.state(), SessionState::Failed);
    assert_eq!(ctl.transcript().last().unwrap().text, "ab");
    assert_eq!(mock.remaining_steps(), 1);
}

#[tokio::test]
async fn test_other_errors_surface_and_retry_continues() {
    let mock = MockTransport::new();
    mock.push_step("Par", false)
        .push_backend_error("Could not allocate attention cache");
    let mut ctl = controller(&mock);

    let err = ctl.submit("Hi").await.unwrap_err();
    assert_eq!(FailureKind::classify(&err), FailureKind::Overloaded);
    assert_eq!(ctl.view().error_kinds, vec![FailureKind::Overloaded]);
    assert_eq!(ctl.state(), SessionState::Failed);
    assert!(!ctl.is_awaiting_input());
    assert_eq!(ctl.position(), 0);
    assert!(ctl.view().retries.is_empty());
    assert_eq!(ctl.pending_failure(), Some(&err));

    assert_eq!(ctl.submit("again?").await.unwrap_err(), ChatError::Busy);
    assert_eq!(ctl.switch_model("bloomz").await.unwrap_err(), ChatError::Busy);

    mock.push_step("tial\n\n", true);
    let outcome = ctl.retry().await.unwrap();
    assert_eq!(outcome.text, "Partial");
    assert_eq!(ctl.state(), SessionState::Ready);
    assert_eq!(
        mock.generates().last().unwrap().inputs.as_deref(),
        Some("Human: Hi\n\nAI:Par")
    );

    assert_eq!(ctl.retry().await.unwrap_err(), ChatError::NothingToRetry);
}

#[tokio::test]
async fn test_auto_retries_are_bounded() {
    let mock = MockTransport::new();
    for _ in 0..3 {
        mock.push_backend_error("Session 1 expired");
    }
    let policy = SessionPolicy::default().with_max_auto_retries(2);
    let mut ctl = controller_with(&mock, policy);

    let err = ctl.submit("Hi").await.unwrap_err();
    assert_eq!(FailureKind::classify(&err), FailureKind::SessionExpired);
    assert_eq!(mock.opens().len(), 3);
    assert_eq!(ctl.view().retries.len(), 2);
}

#[tokio::test]
async fn test_extra_stop_sequences_are_stripped() {
    let mock = MockTransport::new();
    mock.push_step("Yes", false)
        .push_step("\n\nHuman", false)
        .push_step("</s>", true);
    let mut ctl = controller(&mock);
    ctl.switch_model("bloomz").await.unwrap();
    assert_eq!(ctl.model().key(), "test/bloomz");

    let outcome = ctl.submit("Is it?").await.unwrap();
    assert_eq!(outcome.text, "Yes");

    let request = &mock.generates()[0];
    assert_eq!(request.stop_sequence.as_deref(), Some("</s>"));
    assert_eq!(request.extra_stop_sequences, vec!["\n\nHuman".to_string()]);
    assert_eq!(mock.opens()[0].model, "test/bloomz");
}

#[tokio::test]
async fn test_switch_model_keeps_transcript() {
    let mock = MockTransport::new();
    mock.push_step("Hello\n\n", true).push_step("Again</s>", true);
    let policy = SessionPolicy::default().with_initial_max_length(4096);
    let mut ctl = controller_with(&mock, policy);
    assert_eq!(ctl.max_length(), 2048);

    ctl.submit("Hi").await.unwrap();
    assert_eq!(
        ctl.switch_model("nope").await.unwrap_err(),
        ChatError::UnknownModel("nope".into())
    );
    ctl.switch_model("test/bloomz").await.unwrap();
    assert_eq!(ctl.max_length(), 4096);
    assert_eq!(ctl.state(), SessionState::Idle);
    assert_eq!(mock.close_count(), 1);
    assert_eq!(ctl.transcript().len(), 2);

    ctl.submit("Hi again").await.unwrap();
    let opens = mock.opens();
    assert_eq!(opens[1].model, "test/bloomz");
    assert_eq!(opens[1].max_length, 4096);
    assert_eq!(
        mock.generates()[1].inputs.as_deref(),
        Some("Human: Hi\n\nAI:Hello</s>Human: Hi again\n\nAI:")
    );
}

#[tokio::test]
async fn test_reset_recovers_from_failure() {
    let mock = MockTransport::new();
    mock.push_backend_error("Something broke");
    let mut ctl = controller(&mock);

    ctl.submit("Hi").await.unwrap_err();
    ctl.reset().await;
    assert_eq!(ctl.state(), SessionState::Idle);
    assert!(ctl.transcript().is_empty());
    assert!(ctl.pending_failure().is_none());
    assert!(ctl.is_awaiting_input());

    mock.push_step("Fresh\n\n", true);
    ctl.submit("Start over").await.unwrap();
    assert_eq!(
        mock.generates().last().unwrap().inputs.as_deref(),
        Some("Human: Start over\n\nAI:")
    );
}

#[tokio::test]
async fn test_few_shot_mode_has_no_labels() {
    let mock = MockTransport::new();
    mock.push_step(" The president", false).push_step("\n\n", true);
    let policy = SessionPolicy::default().with_mode(DialogueMode::FewShot);
    let mut ctl = controller_with(&mock, policy);

    let outcome = ctl.submit(FEW_SHOT_EXAMPLE).await.unwrap();
    assert_eq!(outcome.text, " The president");
    let expected = format!("{FEW_SHOT_EXAMPLE}\n\n");
    assert_eq!(mock.generates()[0].inputs.as_deref(), Some(expected.as_str()));
    assert_eq!(ctl.transcript().turns()[1].prefix, "");
}

#[tokio::test]
async fn test_speed_reported_from_second_step() {
    let mock = MockTransport::new();
    let delay = Duration::from_millis(20);
    mock.push_delayed_step("a", false, delay)
        .push_delayed_step("b", false, delay)
        .push_delayed_step("c", false, delay)
        .push_delayed_step("\n\n", true, delay);
    let speed = SpeedConfig::new(SpeedUnit::TokensPerSecond).with_slow_threshold(1000.0);
    let mut ctl = controller_with(&mock, SessionPolicy::default().with_speed(speed));

    let outcome = ctl.submit("Go").await.unwrap();
    assert_eq!(outcome.text, "abc");

    // Steps 2 and 3 report; the first is warm-up and the last finalizes.
    let speeds = &ctl.view().speeds;
    assert_eq!(speeds.len(), 2);
    for report in speeds {
        assert_eq!(report.unit, SpeedUnit::TokensPerSecond);
        assert!(report.value > 0.0);
        assert!(report.slow);
    }
    assert_eq!(outcome.metrics.tokens, 4);
}
