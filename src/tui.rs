#![cfg(feature = "tui")]

use crate::api::ChatBackend;
use crate::session::Params;
use crate::stream::{StreamEvent, StreamTurn};
use crate::transcript::{ChatMessage, Role, TokenUsage, Transcript};
use crate::{api, app, cli};
use anyhow::Context;
use crossterm::event::{Event, KeyCode, KeyEvent, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{execute, terminal};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Modifier, Style};
use ratatui::text::{Line, Text};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};
use ratatui::Terminal;
use std::io;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;

/// Updates published by the in-flight streaming turn. `Text` carries the
/// full accumulated reply, so applying it is an idempotent replace.
#[derive(Debug, Clone)]
enum StreamMsg {
    Text(String),
    Usage(TokenUsage),
    Done,
    Error(String),
}

struct Ui {
    transcript: Transcript,
    status: Vec<String>,
    usage: TokenUsage,
    system_prompt: String,
    params: Params,
    api_key: String,
    input: String,
}

pub async fn run_tui(
    args: &cli::Args,
    params: Params,
    api_base: &str,
    api_key: String,
) -> anyhow::Result<()> {
    let http = reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")?;

    let backend_name = args.backend.as_deref().unwrap_or("openai");
    let backend: Arc<dyn ChatBackend> =
        Arc::from(app::build_backend(&http, api_base, backend_name)?);

    let mut ui = Ui {
        transcript: Transcript::new(),
        status: vec![
            "Type a message and press Enter. Commands: /quit, /clear, /model <name>, /key <value>, /system <text>".to_string(),
        ],
        usage: TokenUsage::default(),
        system_prompt: args.system.clone().unwrap_or_default(),
        params,
        api_key,
        input: String::new(),
    };

    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).context("enter alt screen")?;
    terminal::enable_raw_mode().ok();

    let backend_cm = CrosstermBackend::new(stdout);
    let mut terminal_ui = Terminal::new(backend_cm).context("create terminal")?;

    let (ev_tx, mut ev_rx) = mpsc::unbounded_channel::<Event>();
    std::thread::spawn(move || loop {
        match crossterm::event::read() {
            Ok(ev) => {
                if ev_tx.send(ev).is_err() {
                    break;
                }
            }
            Err(_) => break,
        }
    });

    let mut active_stream: Option<mpsc::UnboundedReceiver<StreamMsg>> = None;

    let mut ticker = tokio::time::interval(std::time::Duration::from_millis(33));

    let res = loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = draw(&mut terminal_ui, &ui) {
                    break Err(e);
                }
            }
            Some(ev) = ev_rx.recv() => {
                match ev {
                    Event::Key(key) => {
                        if handle_key(key, &mut ui, &backend, &mut active_stream) {
                            break Ok(());
                        }
                    }
                    Event::Resize(_, _) => {}
                    _ => {}
                }
            }
            Some(msg) = async {
                match &mut active_stream {
                    Some(rx) => rx.recv().await,
                    None => None,
                }
            } => {
                match msg {
                    StreamMsg::Text(snapshot) => {
                        ui.transcript.upsert_assistant_text(snapshot);
                    }
                    StreamMsg::Usage(usage) => {
                        ui.usage = usage;
                    }
                    StreamMsg::Done => {
                        active_stream = None;
                    }
                    StreamMsg::Error(text) => {
                        active_stream = None;
                        ui.transcript.push(ChatMessage::assistant(text));
                    }
                }
            }
        }
    };

    disable_raw_mode().ok();
    execute!(terminal_ui.backend_mut(), LeaveAlternateScreen).ok();
    terminal_ui.show_cursor().ok();

    res
}

fn handle_key(
    key: KeyEvent,
    ui: &mut Ui,
    backend: &Arc<dyn ChatBackend>,
    active_stream: &mut Option<mpsc::UnboundedReceiver<StreamMsg>>,
) -> bool {
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return true;
    }

    match key.code {
        KeyCode::Esc => return true,
        KeyCode::Char(c) => ui.input.push(c),
        KeyCode::Backspace => {
            ui.input.pop();
        }
        KeyCode::Enter => {
            let msg = ui.input.trim().to_string();
            ui.input.clear();
            if msg.is_empty() {
                return false;
            }

            if msg == "/quit" {
                return true;
            }
            if msg == "/clear" {
                ui.transcript.clear();
                ui.usage = TokenUsage::default();
                // Dropping the receiver cancels an in-flight turn; its next
                // send fails and the relay task exits, so the abandoned
                // reply can never land in the cleared transcript.
                *active_stream = None;
                return false;
            }
            if let Some(rest) = msg.strip_prefix("/model ") {
                ui.params.model = rest.trim().to_string();
                ui.status.push(format!("model set to: {}", ui.params.model));
                return false;
            }
            if let Some(rest) = msg.strip_prefix("/key ") {
                ui.api_key = rest.trim().to_string();
                app::persist_key(&ui.api_key);
                ui.status.push("API key updated".to_string());
                return false;
            }
            if let Some(rest) = msg.strip_prefix("/system ") {
                ui.system_prompt = rest.trim().to_string();
                ui.status.push("system prompt updated".to_string());
                return false;
            }

            if active_stream.is_some() {
                ui.status
                    .push("(streaming in progress; wait for completion)".to_string());
                return false;
            }

            ui.transcript.push(ChatMessage::user(msg));

            if ui.api_key.is_empty() {
                ui.transcript.push(ChatMessage::assistant(
                    "Please enter an API key to send messages. Use /key <value>.",
                ));
                return false;
            }

            let req = build_request(ui);
            let (tx, rx) = mpsc::unbounded_channel::<StreamMsg>();
            *active_stream = Some(rx);

            let backend = Arc::clone(backend);
            let api_key = ui.api_key.clone();

            // Dropping the receiver (quit or /clear) makes the sends fail
            // and the task unwind without touching anything.
            tokio::spawn(async move {
                run_turn(backend, api_key, req, tx).await;
            });
        }
        _ => {}
    }

    false
}

fn build_request(ui: &Ui) -> api::ChatCompletionRequest {
    let mut messages = vec![ChatMessage::system(ui.system_prompt.clone())];
    messages.extend(ui.transcript.messages().iter().cloned());
    api::ChatCompletionRequest {
        messages,
        model: ui.params.model.clone(),
        stream: true,
        temperature: ui.params.temperature,
        top_p: ui.params.top_p,
        max_tokens: ui.params.max_tokens,
        response_format: api::ResponseFormat {
            kind: api::ResponseFormatKind::Text,
        },
    }
}

async fn run_turn(
    backend: Arc<dyn ChatBackend>,
    api_key: String,
    req: api::ChatCompletionRequest,
    tx: mpsc::UnboundedSender<StreamMsg>,
) {
    let mut chunks = match backend.stream_chat(&api_key, req).await {
        Ok(s) => s,
        Err(e) => {
            let _ = tx.send(StreamMsg::Error(format!("An error occurred: {e}")));
            return;
        }
    };

    let mut turn = StreamTurn::new();
    while let Some(item) = chunks.next().await {
        let bytes = match item {
            Ok(b) => b,
            Err(e) => {
                turn.fail();
                let _ = tx.send(StreamMsg::Error(format!("An error occurred: {e}")));
                return;
            }
        };

        for event in turn.feed(&bytes) {
            let msg = match event {
                StreamEvent::Delta { text, .. } => StreamMsg::Text(text),
                StreamEvent::Usage(usage) => StreamMsg::Usage(usage),
                StreamEvent::Done => continue,
            };
            if tx.send(msg).is_err() {
                return;
            }
        }
    }
    let _ = tx.send(StreamMsg::Done);
}

fn draw(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    ui: &Ui,
) -> anyhow::Result<()> {
    terminal.draw(|f| {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(1), Constraint::Length(3)])
            .split(f.area());

        let mut text = Text::default();
        for line in ui.status.iter().rev().take(1) {
            text.lines.push(Line::from(line.clone()));
            text.lines.push(Line::from(""));
        }
        for m in ui.transcript.messages() {
            let style = match m.role {
                Role::User => Style::default().add_modifier(Modifier::BOLD),
                _ => Style::default(),
            };
            text.lines.push(Line::styled(format!("{}: ", m.role.as_str()), style));
            text.lines.extend(Text::from(m.content.clone()).lines);
            text.lines.push(Line::from(""));
        }

        let title = format!(
            "playground — model: {} — tokens: {}p/{}c/{}t",
            ui.params.model,
            ui.usage.prompt_tokens,
            ui.usage.completion_tokens,
            ui.usage.total_tokens
        );
        let chat = Paragraph::new(text)
            .block(Block::default().borders(Borders::ALL).title(title))
            .wrap(Wrap { trim: false });

        let input_w = Paragraph::new(ui.input.to_string())
            .block(Block::default().borders(Borders::ALL).title("input"));

        f.render_widget(chat, chunks[0]);
        f.render_widget(input_w, chunks[1]);

        let x = chunks[1].x + 1 + ui.input.chars().count() as u16;
        let y = chunks[1].y + 1;
        f.set_cursor_position((x.min(chunks[1].x + chunks[1].width.saturating_sub(2)), y));
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::stub::StubBackend;

    fn ui_with(params: Params) -> Ui {
        Ui {
            transcript: Transcript::new(),
            status: Vec::new(),
            usage: TokenUsage::default(),
            system_prompt: String::new(),
            params,
            api_key: "sk-test".to_string(),
            input: String::new(),
        }
    }

    fn press_enter(
        ui: &mut Ui,
        backend: &Arc<dyn ChatBackend>,
        active: &mut Option<mpsc::UnboundedReceiver<StreamMsg>>,
    ) {
        handle_key(
            KeyEvent::new(KeyCode::Enter, KeyModifiers::NONE),
            ui,
            backend,
            active,
        );
    }

    #[test]
    fn clear_during_stream_cancels_the_turn() {
        let backend: Arc<dyn ChatBackend> = Arc::new(StubBackend::new());
        let mut ui = ui_with(Params::default());

        // A turn in flight: user message, partial reply, live channel.
        ui.transcript.push(ChatMessage::user("question"));
        ui.transcript.upsert_assistant_text("partial reply");
        let (tx, rx) = mpsc::unbounded_channel::<StreamMsg>();
        let mut active = Some(rx);

        ui.input = "/clear".to_string();
        press_enter(&mut ui, &backend, &mut active);

        assert!(ui.transcript.is_empty());
        assert!(active.is_none());
        // The receiver is gone, so the relay's next snapshot cannot land in
        // the cleared transcript.
        assert!(tx.send(StreamMsg::Text("abandoned reply".into())).is_err());
    }

    #[test]
    fn submissions_are_refused_while_streaming() {
        let backend: Arc<dyn ChatBackend> = Arc::new(StubBackend::new());
        let mut ui = ui_with(Params::default());
        let (_tx, rx) = mpsc::unbounded_channel::<StreamMsg>();
        let mut active = Some(rx);

        ui.input = "another question".to_string();
        press_enter(&mut ui, &backend, &mut active);

        assert!(ui.transcript.is_empty());
        assert!(active.is_some());
        assert!(ui.status.last().unwrap().contains("streaming in progress"));
    }

    #[test]
    fn requests_carry_the_resolved_params() {
        let mut ui = ui_with(Params {
            model: "tuned-model".to_string(),
            temperature: 0.2,
            top_p: 0.5,
            max_tokens: 512,
            ..Default::default()
        });
        ui.system_prompt = "be brief".to_string();
        ui.transcript.push(ChatMessage::user("hi"));

        let req = build_request(&ui);
        assert_eq!(req.model, "tuned-model");
        assert_eq!(req.temperature, 0.2);
        assert_eq!(req.top_p, 0.5);
        assert_eq!(req.max_tokens, 512);
        assert!(req.stream);
        assert_eq!(req.messages[0].content, "be brief");
        assert_eq!(req.messages[1].content, "hi");
    }
}
