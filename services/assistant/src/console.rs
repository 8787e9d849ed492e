use std::str::FromStr;

use anyhow::Result;
use assistant_core::{
    ConnectionStatus, MessageRole, SessionOrchestrator, SessionSnapshot, UiCommand, UiMode,
    VoiceState,
};
use gemini_live::types::audio::Voice;

pub const HELP: &str = "\
commands:
  <text>                 send a message
  /record, /stop         start or stop the microphone (voice mode)
  /voice, /text          switch mode
  /connect, /disconnect  manage the session
  /clear                 clear the conversation
  /sidebar               toggle the sidebar
  /set-voice <name>      voice for the next connection
  /instructions <text>   system instructions for the next connection
  /tools on|off          tool use for the next connection
  /reset-mic             forget a refused microphone
  /status                show the session state
  /quit                  exit";

/// One line typed by the user.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Say(String),
    Record,
    Stop,
    VoiceMode,
    TextMode,
    Connect,
    Disconnect,
    Clear,
    Sidebar,
    SetVoice(Voice),
    Instructions(String),
    Tools(bool),
    ResetMic,
    Status,
    Help,
    Quit,
    Nothing,
}

pub fn parse(line: &str) -> Result<Command, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Command::Nothing);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Command::Say(line.to_string()));
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };
    let command = match (name, arg) {
        ("record", "") => Command::Record,
        ("stop", "") => Command::Stop,
        ("voice", "") => Command::VoiceMode,
        ("text", "") => Command::TextMode,
        ("connect", "") => Command::Connect,
        ("disconnect", "") => Command::Disconnect,
        ("clear", "") => Command::Clear,
        ("sidebar", "") => Command::Sidebar,
        ("reset-mic", "") => Command::ResetMic,
        ("status", "") => Command::Status,
        ("help", "") => Command::Help,
        ("quit" | "exit", "") => Command::Quit,
        ("set-voice", voice) if !voice.is_empty() => {
            Command::SetVoice(Voice::from_str(voice).unwrap_or_else(|never| match never {}))
        }
        ("instructions", text) if !text.is_empty() => Command::Instructions(text.to_string()),
        ("tools", "on") => Command::Tools(true),
        ("tools", "off") => Command::Tools(false),
        _ => return Err(format!("unknown command {:?}, try /help", line)),
    };
    Ok(command)
}

/// Runs `command`. Returns false when the user asked to quit.
pub async fn execute(orch: &mut SessionOrchestrator, command: Command) -> Result<bool> {
    match command {
        Command::Say(text) => orch.send_text_message(&text).await?,
        Command::Record => orch.start_voice_recording().await?,
        Command::Stop => orch.stop_voice_recording(),
        Command::VoiceMode => orch.switch_to_voice_mode().await?,
        Command::TextMode => orch.switch_to_text_mode().await?,
        Command::Connect => orch.connect().await?,
        Command::Disconnect => orch.disconnect().await,
        Command::Clear => orch.clear_conversation(),
        Command::Sidebar => orch.toggle_sidebar(),
        Command::SetVoice(voice) => {
            println!("voice {} applies from the next connection", voice);
            orch.set_voice(voice);
        }
        Command::Instructions(text) => {
            orch.set_instructions(&text)?;
            println!("instructions apply from the next connection");
        }
        Command::Tools(enabled) => orch.set_tools_enabled(enabled),
        Command::ResetMic => orch.reset_microphone_permission(),
        Command::Status => println!("{}", describe(&orch.snapshot())),
        Command::Help => println!("{}", HELP),
        Command::Quit => return Ok(false),
        Command::Nothing => {}
    }
    Ok(true)
}

pub fn describe(snapshot: &SessionSnapshot) -> String {
    let connection = match snapshot.session.connection_status {
        ConnectionStatus::Disconnected => "disconnected",
        ConnectionStatus::Connecting => "connecting",
        ConnectionStatus::Connected => "connected",
        ConnectionStatus::Error => "error",
    };
    let mode = match snapshot.session.ui_mode {
        UiMode::Voice => "voice",
        UiMode::Text => "text",
    };
    let voice = match snapshot.session.voice_state {
        VoiceState::Idle => "idle",
        VoiceState::Listening => "listening",
        VoiceState::Speaking => "speaking",
        VoiceState::Paused => "paused",
    };
    let mut line = format!("[{} | {} | {}]", connection, mode, voice);
    if snapshot.is_recording {
        line.push_str(" rec");
    }
    if snapshot.is_sidebar_open {
        line.push_str(" sidebar");
    }
    if let Some(error) = &snapshot.last_error {
        line.push_str(&format!(" error: {}", error));
    }
    line
}

/// Prints the status line only when it changes.
#[derive(Debug, Default)]
pub struct StatusLine {
    last: Option<String>,
}

impl StatusLine {
    pub fn update(&mut self, snapshot: &SessionSnapshot) -> Option<String> {
        let line = describe(snapshot);
        if self.last.as_deref() == Some(line.as_str()) {
            return None;
        }
        self.last = Some(line.clone());
        Some(line)
    }
}

/// Prints assistant replies finalized since the last call.
pub fn print_new_messages(orch: &SessionOrchestrator, printed: &mut usize) {
    let messages = orch.messages();
    if messages.len() < *printed {
        // conversation was cleared
        *printed = 0;
    }
    for message in &messages[*printed..] {
        if message.role != MessageRole::Assistant {
            continue;
        }
        match (message.text(), &message.content.audio) {
            (Some(text), _) => println!("assistant: {}", text),
            (None, Some(audio)) => println!("assistant: <{} ms of audio>", audio.duration_ms),
            (None, None) => {}
        }
    }
    *printed = messages.len();
}

pub fn show_ui_command(command: &UiCommand) -> String {
    match command {
        UiCommand::ScrollToSection(section) => format!("[ui] showing section {:?}", section),
        UiCommand::SwitchSectionMode { section, mode } => {
            format!("[ui] section {:?} now in {:?} mode", section, mode)
        }
        UiCommand::CollectUserInfo { question, .. } => format!("[assistant asks] {}", question),
    }
}
