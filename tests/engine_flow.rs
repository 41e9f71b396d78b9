mod support;

use std::fs;
use std::sync::Arc;
use std::time::{Duration, Instant};

use assistant_engine::{
    AssistantSettings, ChatEngine, ChatTransport, EngineError, MAX_FOLLOW_UP_DEPTH,
};
use editor_host::{AutoApprove, BufferEditor, EditorOps, ReviewGate, ReviewVerdict, TranscriptSink};
use openrouter_api::{OpenRouterError, Role};
use tempfile::TempDir;

use support::{FakeTransport, GatedTransport, RecordingSink, Scripted, ScriptedReview, SinkEvent};

const READ_DEMO: &str = "```json\n{\"type\": \"read_file\", \"path\": \"demo.py\"}\n```";
const STOP_RESPONSE: &str = "```json\n{\"type\": \"stop\", \"message\": \"All edits applied\"}\n```";

struct Fixture {
    engine: Arc<ChatEngine>,
    sink: Arc<RecordingSink>,
    editor: Arc<BufferEditor>,
    project: TempDir,
}

fn fixture(
    transport: Arc<dyn ChatTransport>,
    settings: AssistantSettings,
    editor: BufferEditor,
    review: Arc<dyn ReviewGate>,
) -> Fixture {
    let project = TempDir::new().expect("temp project dir");
    let sink = Arc::new(RecordingSink::default());
    let editor = Arc::new(editor);

    let engine = Arc::new(ChatEngine::new(
        settings,
        Some(project.path().to_path_buf()),
        transport,
        Arc::clone(&editor) as Arc<dyn EditorOps>,
        review,
        Arc::clone(&sink) as Arc<dyn TranscriptSink>,
    ));

    Fixture {
        engine,
        sink,
        editor,
        project,
    }
}

fn default_fixture(transport: Arc<dyn ChatTransport>) -> Fixture {
    fixture(
        transport,
        AssistantSettings::default(),
        BufferEditor::new(),
        Arc::new(AutoApprove),
    )
}

#[test]
fn plain_response_round_trips_into_history_and_sink() {
    let transport = Arc::new(FakeTransport::scripted(vec![Scripted::Fragments(vec![
        "Here is ".to_string(),
        "an explanation.".to_string(),
    ])]));
    let fixture = default_fixture(Arc::clone(&transport) as Arc<dyn ChatTransport>);

    fixture
        .engine
        .send_user_message_blocking("explain the project")
        .expect("engine is idle");

    let turns = fixture.engine.conversation_turns();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].role, Role::User);
    assert_eq!(turns[0].content, "explain the project");
    assert_eq!(turns[1].role, Role::Assistant);
    assert_eq!(turns[1].content, "Here is an explanation.");

    let events = fixture.sink.events();
    assert_eq!(events[0], SinkEvent::Begin);
    assert_eq!(events[1], SinkEvent::Delta("Here is ".to_string()));
    assert_eq!(
        events.last(),
        Some(&SinkEvent::Finalize("Here is an explanation.".to_string()))
    );
    assert!(!fixture.engine.is_generation_active());
}

#[test]
fn request_carries_instruction_snapshot_and_prompt() {
    let transport = Arc::new(FakeTransport::responses(&["ok"]));
    let fixture = default_fixture(Arc::clone(&transport) as Arc<dyn ChatTransport>);
    fs::write(fixture.project.path().join("visible.py"), "x = 1").expect("seed project file");

    fixture
        .engine
        .send_user_message_blocking("hello")
        .expect("engine is idle");

    let requests = support::lock_unpoisoned(&transport.requests);
    let messages = &requests[0].messages;
    assert_eq!(messages[0].role, Role::System);
    assert!(!messages[0].content.is_empty());
    assert_eq!(messages[1].role, Role::System);
    assert!(messages[1].content.contains("file-system structure"));
    assert!(messages[1].content.contains("visible.py"));
    assert_eq!(messages.last().map(|message| message.role), Some(Role::User));
}

#[test]
fn read_file_command_loops_back_with_file_content() {
    let transport = Arc::new(FakeTransport::responses(&[READ_DEMO, "The file looks fine."]));
    let fixture = default_fixture(Arc::clone(&transport) as Arc<dyn ChatTransport>);
    fs::write(fixture.project.path().join("demo.py"), "print('demo')").expect("seed demo file");

    fixture
        .engine
        .send_user_message_blocking("check demo.py")
        .expect("engine is idle");

    assert_eq!(transport.call_count(), 2);

    let turns = fixture.engine.conversation_turns();
    assert_eq!(turns.len(), 4);
    assert_eq!(turns[1].role, Role::Assistant);
    assert_eq!(turns[1].content, READ_DEMO);
    // The synthesized follow-up lands before the assistant turn it produced.
    assert_eq!(turns[2].role, Role::User);
    assert!(turns[2].content.contains("Contents of file"));
    assert!(turns[2].content.contains("print('demo')"));
    assert_eq!(turns[3].content, "The file looks fine.");

    // The suppressed response renders as an annotation, not as body text.
    assert!(fixture.sink.finalized().contains(&String::new()));
    assert!(fixture
        .sink
        .annotations()
        .iter()
        .any(|(tag, text)| *tag == "info" && text.contains("Reading file: demo.py")));
}

#[test]
fn missing_file_read_fails_visibly_without_recursion() {
    let transport = Arc::new(FakeTransport::responses(&[READ_DEMO, "unreachable"]));
    let fixture = default_fixture(Arc::clone(&transport) as Arc<dyn ChatTransport>);

    fixture
        .engine
        .send_user_message_blocking("check demo.py")
        .expect("engine is idle");

    assert_eq!(transport.call_count(), 1);

    let turns = fixture.engine.conversation_turns();
    assert_eq!(turns.last().map(|turn| turn.role), Some(Role::System));
    assert!(turns
        .last()
        .map(|turn| turn.content.contains("file not found"))
        .unwrap_or(false));
    assert!(fixture
        .sink
        .annotations()
        .iter()
        .any(|(tag, text)| *tag == "error" && text.contains("file not found")));
    assert!(!fixture.engine.is_generation_active());
}

#[test]
fn execute_command_feeds_captured_output_back() {
    let transport = Arc::new(FakeTransport::responses(&[
        r#"{"type": "execute", "command": "echo protocol-check"}"#,
        "Command output received.",
    ]));
    let fixture = default_fixture(Arc::clone(&transport) as Arc<dyn ChatTransport>);

    fixture
        .engine
        .send_user_message_blocking("run the check")
        .expect("engine is idle");

    assert_eq!(transport.call_count(), 2);

    let turns = fixture.engine.conversation_turns();
    let follow_up = &turns[2];
    assert_eq!(follow_up.role, Role::User);
    assert!(follow_up.content.contains("Result of command 'echo protocol-check'"));
    assert!(follow_up.content.contains("protocol-check"));
    assert!(follow_up.content.contains("exit code 0"));
}

#[test]
fn denylisted_command_is_rejected_and_never_recursed() {
    let transport = Arc::new(FakeTransport::responses(&[
        r#"{"type": "execute", "command": "rm -rf /"}"#,
        "unreachable",
    ]));
    let fixture = default_fixture(Arc::clone(&transport) as Arc<dyn ChatTransport>);

    fixture
        .engine
        .send_user_message_blocking("clean up")
        .expect("engine is idle");

    assert_eq!(transport.call_count(), 1);
    assert!(fixture
        .sink
        .annotations()
        .iter()
        .any(|(tag, text)| *tag == "error" && text.contains("blocked for safety")));

    let turns = fixture.engine.conversation_turns();
    assert_eq!(turns.last().map(|turn| turn.role), Some(Role::System));
}

#[test]
fn cancellation_mid_stream_keeps_partial_text_and_skips_dispatch() {
    let transport = Arc::new(FakeTransport::scripted(vec![Scripted::CancelAfter {
        fragments: vec![
            "one ".to_string(),
            "two ".to_string(),
            "three ".to_string(),
            READ_DEMO.to_string(),
        ],
        emit: 2,
    }]));
    let fixture = default_fixture(Arc::clone(&transport) as Arc<dyn ChatTransport>);

    fixture
        .engine
        .send_user_message_blocking("go")
        .expect("engine is idle");

    assert_eq!(transport.call_count(), 1);
    // Exactly the applied fragments survive, nothing more.
    assert_eq!(fixture.sink.finalized(), vec!["one two ".to_string()]);
    // No assistant turn is recorded and no command dispatched.
    let turns = fixture.engine.conversation_turns();
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0].role, Role::User);
    assert!(fixture
        .sink
        .annotations()
        .iter()
        .any(|(tag, text)| *tag == "error" && text.contains("stopped by the user")));
    assert!(!fixture.engine.is_generation_active());
}

#[test]
fn stop_with_auto_continue_schedules_exactly_one_follow_up() {
    let transport = Arc::new(FakeTransport::repeating(STOP_RESPONSE));
    let fixture = default_fixture(Arc::clone(&transport) as Arc<dyn ChatTransport>);

    fixture
        .engine
        .send_user_message_blocking("do the task")
        .expect("engine is idle");

    // One original call plus max_auto_continues (default 1) continuation.
    assert_eq!(transport.call_count(), 2);
    assert!(!fixture.engine.is_generation_active());
}

#[test]
fn stop_without_auto_continue_ends_the_turn() {
    let transport = Arc::new(FakeTransport::repeating(STOP_RESPONSE));
    let settings = AssistantSettings {
        auto_continue_enabled: false,
        ..AssistantSettings::default()
    };
    let fixture = fixture(
        Arc::clone(&transport) as Arc<dyn ChatTransport>,
        settings,
        BufferEditor::new(),
        Arc::new(AutoApprove),
    );

    fixture
        .engine
        .send_user_message_blocking("do the task")
        .expect("engine is idle");

    assert_eq!(transport.call_count(), 1);
    assert!(fixture.sink.finalized()[0].contains("*All edits applied*"));
}

#[test]
fn follow_up_recursion_is_bounded() {
    let transport = Arc::new(FakeTransport::repeating(READ_DEMO));
    let fixture = default_fixture(Arc::clone(&transport) as Arc<dyn ChatTransport>);
    fs::write(fixture.project.path().join("demo.py"), "print('demo')").expect("seed demo file");

    fixture
        .engine
        .send_user_message_blocking("read forever")
        .expect("engine is idle");

    // MAX_FOLLOW_UP_DEPTH dispatched follow-ups plus the call that hit the cap.
    assert_eq!(transport.call_count(), (MAX_FOLLOW_UP_DEPTH + 1) as usize);
    assert!(fixture
        .sink
        .annotations()
        .iter()
        .any(|(tag, text)| *tag == "error" && text.contains("follow-up limit")));
    assert!(!fixture.engine.is_generation_active());
}

#[test]
fn code_insert_applies_to_editor_and_registers_a_block() {
    let insert = "```json\n{\"type\": \"code_insert\", \"insert_type\": \"line\", \"line\": 3, \"code\": \"x = 1\"}\n```";
    let transport = Arc::new(FakeTransport::responses(&[insert]));
    let fixture = fixture(
        Arc::clone(&transport) as Arc<dyn ChatTransport>,
        AssistantSettings::default(),
        BufferEditor::with_content("demo.py", "a\nb\nc\nd\ne"),
        Arc::new(AutoApprove),
    );

    fixture
        .engine
        .send_user_message_blocking("insert it")
        .expect("engine is idle");

    assert_eq!(
        fixture.editor.current_file_content(),
        "a\nb\nx = 1\nc\nd\ne"
    );
    assert!(fixture
        .sink
        .annotations()
        .iter()
        .any(|(tag, text)| *tag == "info" && text.contains("Code inserted at line 3")));
    assert!(fixture.sink.finalized()[0].contains("Insert code at line 3"));

    // A transcript click resolves the registered payload and re-applies it.
    fixture
        .engine
        .insert_code_block(1)
        .expect("block 1 is registered");
    assert_eq!(fixture.editor.line_count(), 7);
}

#[test]
fn out_of_range_insert_is_clamped_not_refused() {
    let insert = "```json\n{\"type\": \"code_insert\", \"insert_type\": \"range\", \"start_line\": 500, \"end_line\": 600, \"code\": \"tail()\"}\n```";
    let transport = Arc::new(FakeTransport::responses(&[insert]));
    let ten_lines = (1..=10)
        .map(|index| format!("line {index}"))
        .collect::<Vec<_>>()
        .join("\n");
    let fixture = fixture(
        Arc::clone(&transport) as Arc<dyn ChatTransport>,
        AssistantSettings::default(),
        BufferEditor::with_content("demo.py", &ten_lines),
        Arc::new(AutoApprove),
    );

    fixture
        .engine
        .send_user_message_blocking("extend the file")
        .expect("engine is idle");

    let content = fixture.editor.current_file_content();
    let lines: Vec<&str> = content.split('\n').collect();
    assert_eq!(lines.len(), 10);
    assert_eq!(lines[8], "line 9");
    assert_eq!(lines[9], "tail()");
}

#[test]
fn disabled_code_insertion_still_registers_click_targets() {
    let insert = "```json\n{\"type\": \"code_insert\", \"code\": \"pass\"}\n```";
    let transport = Arc::new(FakeTransport::responses(&[insert]));
    let settings = AssistantSettings {
        code_insertion_enabled: false,
        ..AssistantSettings::default()
    };
    let fixture = fixture(
        Arc::clone(&transport) as Arc<dyn ChatTransport>,
        settings,
        BufferEditor::with_content("demo.py", "original"),
        Arc::new(AutoApprove),
    );

    fixture
        .engine
        .send_user_message_blocking("suggest code")
        .expect("engine is idle");

    // Nothing was auto-applied.
    assert_eq!(fixture.editor.current_file_content(), "original");

    // The click path still works.
    fixture
        .engine
        .insert_code_block(1)
        .expect("block 1 is registered");
    assert!(fixture.editor.current_file_content().contains("pass"));
}

#[test]
fn rejected_replace_leaves_the_file_untouched_and_informs_the_model() {
    let replace = "```json\n{\"type\": \"replace_file\", \"path\": \"target.py\", \"content\": \"new body\"}\n```";
    let transport = Arc::new(FakeTransport::responses(&[replace]));
    let review = Arc::new(ScriptedReview::new(vec![ReviewVerdict::Reject]));
    let fixture = fixture(
        Arc::clone(&transport) as Arc<dyn ChatTransport>,
        AssistantSettings::default(),
        BufferEditor::new(),
        Arc::clone(&review) as Arc<dyn ReviewGate>,
    );
    let target = fixture.project.path().join("target.py");
    fs::write(&target, "old body").expect("seed target file");

    fixture
        .engine
        .send_user_message_blocking("rewrite target.py")
        .expect("engine is idle");

    assert_eq!(review.review_count(), 1);
    assert_eq!(
        fs::read_to_string(&target).expect("target still readable"),
        "old body"
    );

    let turns = fixture.engine.conversation_turns();
    let declined = turns.last().expect("history has a declined turn");
    assert_eq!(declined.role, Role::User);
    assert!(declined.content.contains("declined"));
}

#[test]
fn transport_error_becomes_one_annotation_and_one_history_record() {
    let transport = Arc::new(FakeTransport::scripted(vec![Scripted::Error(
        OpenRouterError::RateLimited("slow down".to_string()),
    )]));
    let fixture = default_fixture(Arc::clone(&transport) as Arc<dyn ChatTransport>);

    fixture
        .engine
        .send_user_message_blocking("hello")
        .expect("engine is idle");

    let error_annotations: Vec<_> = fixture
        .sink
        .annotations()
        .into_iter()
        .filter(|(tag, _)| *tag == "error")
        .collect();
    assert_eq!(error_annotations.len(), 1);
    assert!(error_annotations[0].1.contains("rate limit"));

    let turns = fixture.engine.conversation_turns();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[1].role, Role::System);
    assert!(!fixture.engine.is_generation_active());
}

#[test]
fn second_send_while_active_is_rejected() {
    let (gated, release) = GatedTransport::new();
    let fixture = default_fixture(Arc::new(gated) as Arc<dyn ChatTransport>);

    fixture
        .engine
        .send_user_message("first")
        .expect("engine is idle");

    assert!(matches!(
        fixture.engine.send_user_message("second"),
        Err(EngineError::GenerationActive)
    ));

    release.send(()).expect("release the gated transport");

    let deadline = Instant::now() + Duration::from_secs(2);
    while fixture.engine.is_generation_active() {
        assert!(Instant::now() < deadline, "generation should finish");
        std::thread::sleep(Duration::from_millis(10));
    }

    // The guard cleared; a new send is accepted again.
    let turns = fixture.engine.conversation_turns();
    assert_eq!(turns.len(), 2);
}

#[test]
fn clear_history_resets_turns_and_registry() {
    let insert = "```json\n{\"type\": \"code_insert\", \"code\": \"pass\"}\n```";
    let transport = Arc::new(FakeTransport::responses(&[insert]));
    let fixture = default_fixture(Arc::clone(&transport) as Arc<dyn ChatTransport>);

    fixture
        .engine
        .send_user_message_blocking("suggest code")
        .expect("engine is idle");
    assert!(!fixture.engine.conversation_turns().is_empty());

    fixture.engine.clear_history();

    assert!(fixture.engine.conversation_turns().is_empty());
    assert!(matches!(
        fixture.engine.insert_code_block(1),
        Err(EngineError::Config(_))
    ));
}
