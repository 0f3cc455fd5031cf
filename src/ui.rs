use crate::client::{Attachment, BufferedReply, RelayClient};
use crate::protocol::StreamRecord;
use crate::transcript::{Entry, Speaker, Transcript};
use crossterm::cursor::MoveTo;
use crossterm::event::{self, Event, KeyCode, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, size};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Paragraph, Widget, Wrap};
use ratatui::{Frame, Terminal, TerminalOptions, Viewport};
use std::io;
use std::io::Write;
use std::time::Duration;
use tokio::sync::mpsc;

type TuiTerminal = Terminal<CrosstermBackend<io::Stdout>>;
type UiResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

const INPUT_HEIGHT: u16 = 6;
const LIVE_HEIGHT: u16 = 8;

// Restores terminal settings even if the loop exits early.
struct TerminalGuard;

impl TerminalGuard {
    fn new() -> Self {
        Self
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = io::stdout().flush();
    }
}

#[derive(Debug, Clone)]
struct LineSpec {
    text: String,
    style: Style,
}

impl LineSpec {
    fn new(text: impl Into<String>, style: Style) -> Self {
        Self {
            text: text.into(),
            style,
        }
    }
}

fn line_specs(entry: &Entry) -> Vec<LineSpec> {
    let (header, color) = match entry.speaker {
        Speaker::User => (Some("You:"), Color::Blue),
        Speaker::Assistant => (Some("NEMO:"), Color::Yellow),
        Speaker::Error => (Some("NEMO:"), Color::Red),
        Speaker::Notice => (None, Color::Gray),
    };

    let Some(header) = header else {
        return vec![LineSpec::new(
            format!("ℹ {}", entry.text),
            Style::default().fg(color).add_modifier(Modifier::ITALIC),
        )];
    };

    let header_style = Style::default().fg(color).add_modifier(Modifier::BOLD);
    let body_style = if entry.placeholder {
        Style::default()
            .fg(Color::DarkGray)
            .add_modifier(Modifier::ITALIC)
    } else {
        Style::default().fg(color)
    };

    let mut lines = vec![LineSpec::new(header, header_style)];
    for line in entry.text.lines() {
        lines.push(LineSpec::new(format!("  {}", line), body_style));
    }
    lines
}

fn to_text(entry: &Entry) -> Text<'static> {
    let lines = line_specs(entry)
        .into_iter()
        .map(|spec| Line::from(Span::styled(spec.text, spec.style)))
        .collect::<Vec<_>>();
    Text::from(lines)
}

fn rendered_height(entry: &Entry, width: u16) -> u16 {
    let width = width.max(1) as usize;
    let total: usize = line_specs(entry)
        .iter()
        .map(|spec| spec.text.chars().count().max(1).div_ceil(width))
        .sum();
    total.min(u16::MAX as usize) as u16
}

#[derive(Debug)]
pub enum UiEvent {
    Record(StreamRecord),
    StreamFinished,
    Reply(BufferedReply),
    Failed(String),
    Attached(Attachment),
    Notice(String),
    Quit,
}

/// What a submitted input line asks for.
#[derive(Debug, PartialEq, Eq)]
enum Command {
    Attach(String),
    Detach,
    Send(String),
    Usage(&'static str),
    Nothing,
}

/// With a file attached, an empty line still sends it.
fn parse_input(input: &str, attached: bool) -> Command {
    let trimmed = input.trim();
    if let Some(rest) = trimmed.strip_prefix("/attach") {
        if rest.is_empty() || rest.starts_with(char::is_whitespace) {
            let path = rest.trim();
            return if path.is_empty() {
                Command::Usage("Usage: /attach <path>")
            } else {
                Command::Attach(path.to_string())
            };
        }
    }
    if trimmed == "/detach" {
        return Command::Detach;
    }
    if trimmed.is_empty() {
        if attached {
            Command::Send(String::new())
        } else {
            Command::Nothing
        }
    } else {
        Command::Send(trimmed.to_string())
    }
}

struct InputBuffer {
    lines: Vec<String>,
    cursor_x: usize,
    cursor_y: usize,
}

impl InputBuffer {
    fn new() -> Self {
        Self {
            lines: vec![String::new()],
            cursor_x: 0,
            cursor_y: 0,
        }
    }

    fn clear(&mut self) {
        self.lines = vec![String::new()];
        self.cursor_x = 0;
        self.cursor_y = 0;
    }

    fn byte_offset(&self) -> usize {
        self.lines[self.cursor_y]
            .char_indices()
            .nth(self.cursor_x)
            .map(|(idx, _)| idx)
            .unwrap_or_else(|| self.lines[self.cursor_y].len())
    }

    fn line_chars(&self) -> usize {
        self.lines[self.cursor_y].chars().count()
    }

    fn insert_char(&mut self, c: char) {
        let offset = self.byte_offset();
        self.lines[self.cursor_y].insert(offset, c);
        self.cursor_x += 1;
    }

    fn delete_char(&mut self) {
        if self.cursor_x > 0 {
            self.cursor_x -= 1;
            let offset = self.byte_offset();
            self.lines[self.cursor_y].remove(offset);
        } else if self.cursor_y > 0 {
            let prev_line = self.lines.remove(self.cursor_y);
            self.cursor_y -= 1;
            self.cursor_x = self.line_chars();
            self.lines[self.cursor_y].push_str(&prev_line);
        }
    }

    fn new_line(&mut self) {
        let offset = self.byte_offset();
        let remaining = self.lines[self.cursor_y].split_off(offset);
        self.lines.insert(self.cursor_y + 1, remaining);
        self.cursor_y += 1;
        self.cursor_x = 0;
    }

    fn move_left(&mut self) {
        if self.cursor_x > 0 {
            self.cursor_x -= 1;
        } else if self.cursor_y > 0 {
            self.cursor_y -= 1;
            self.cursor_x = self.line_chars();
        }
    }

    fn move_right(&mut self) {
        if self.cursor_x < self.line_chars() {
            self.cursor_x += 1;
        } else if self.cursor_y < self.lines.len() - 1 {
            self.cursor_y += 1;
            self.cursor_x = 0;
        }
    }

    fn move_up(&mut self) {
        if self.cursor_y > 0 {
            self.cursor_y -= 1;
            self.cursor_x = self.cursor_x.min(self.line_chars());
        }
    }

    fn move_down(&mut self) {
        if self.cursor_y < self.lines.len() - 1 {
            self.cursor_y += 1;
            self.cursor_x = self.cursor_x.min(self.line_chars());
        }
    }

    fn contents(&self) -> String {
        self.lines.join("\n")
    }

    fn is_empty(&self) -> bool {
        self.lines.iter().all(|l| l.is_empty())
    }

    fn render(&self) -> Text<'static> {
        if self.is_empty() {
            return Text::from(Span::styled(
                "Ask NEMO something, or /attach <path>...",
                Style::default().fg(Color::DarkGray),
            ));
        }
        Text::from(
            self.lines
                .iter()
                .map(|l| Line::from(l.clone()))
                .collect::<Vec<_>>(),
        )
    }
}

impl Default for InputBuffer {
    fn default() -> Self {
        Self::new()
    }
}

pub struct App {
    transcript: Transcript,
    flushed: usize,
    input: InputBuffer,
    attachment: Option<Attachment>,
    should_quit: bool,
    sender: mpsc::Sender<UiEvent>,
    receiver: mpsc::Receiver<UiEvent>,
    client: RelayClient,
}

impl App {
    pub fn new(client: RelayClient) -> Self {
        let (sender, receiver) = mpsc::channel(100);

        let mut transcript = Transcript::new();
        transcript.push_notice(format!(
            "Connected to {}. /attach <path> adds a file to the next message, /detach drops it.",
            client.base_url()
        ));

        Self {
            transcript,
            flushed: 0,
            input: InputBuffer::new(),
            attachment: None,
            should_quit: false,
            sender,
            receiver,
            client,
        }
    }

    fn draw(&mut self, f: &mut Frame) {
        let [live_area, input_area] =
            Layout::vertical([Constraint::Min(1), Constraint::Length(INPUT_HEIGHT)])
                .areas(f.area());

        if let Some(entry) = self.transcript.live() {
            let height = rendered_height(entry, live_area.width);
            let paragraph = Paragraph::new(to_text(entry))
                .wrap(Wrap { trim: false })
                .scroll((height.saturating_sub(live_area.height), 0));
            f.render_widget(paragraph, live_area);
        }

        let mut title = String::from(" Input (Enter to send, Esc to quit) ");
        if let Some(attachment) = &self.attachment {
            title.push_str(&format!("[file: {}] ", attachment.name));
        }
        if self.transcript.in_flight() {
            title.push_str("[Thinking...] ");
        }

        let input_paragraph = Paragraph::new(self.input.render())
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(title)
                    .border_style(Style::default().fg(Color::DarkGray)),
            )
            .wrap(Wrap { trim: false });

        f.render_widget(input_paragraph, input_area);

        let cursor_x = (self.input.cursor_x + 1) as u16;
        let cursor_y = self.input.cursor_y as u16;
        let x = (input_area.x + cursor_x).min(input_area.x + input_area.width - 2);
        let y = (input_area.y + 1 + cursor_y).min(input_area.y + input_area.height - 2);
        f.set_cursor_position((x, y));
    }

    // Moves entries that can no longer change into the terminal's scrollback.
    fn flush_settled(&mut self, terminal: &mut TuiTerminal) -> UiResult<()> {
        let settled = self.transcript.settled_len();
        if settled <= self.flushed {
            return Ok(());
        }

        let width = terminal.size()?.width;
        for entry in &self.transcript.entries()[self.flushed..settled] {
            let height = rendered_height(entry, width).saturating_add(1);
            let mut text = to_text(entry);
            text.extend(Text::raw("\n"));
            terminal.insert_before(height, |buf| {
                let paragraph = Paragraph::new(text).wrap(Wrap { trim: false });
                paragraph.render(buf.area, buf);
            })?;
        }
        self.flushed = settled;
        Ok(())
    }

    fn apply(&mut self, event: UiEvent) {
        match event {
            UiEvent::Record(record) => {
                self.transcript.apply(&record);
            }
            UiEvent::StreamFinished => self.transcript.finish_stream(),
            UiEvent::Reply(reply) => self.transcript.show_reply(reply),
            UiEvent::Failed(message) => self.transcript.fail(message),
            UiEvent::Attached(attachment) => {
                self.transcript.push_notice(format!(
                    "{} ({} bytes) will be sent with the next message",
                    attachment.name,
                    attachment.bytes.len()
                ));
                self.attachment = Some(attachment);
            }
            UiEvent::Notice(message) => self.transcript.push_notice(message),
            UiEvent::Quit => self.should_quit = true,
        }
    }

    fn submit(&mut self) {
        match parse_input(&self.input.contents(), self.attachment.is_some()) {
            Command::Nothing => return,
            Command::Usage(usage) => self.transcript.push_notice(usage),
            Command::Detach => match self.attachment.take() {
                Some(attachment) => self
                    .transcript
                    .push_notice(format!("Detached {}", attachment.name)),
                None => self.transcript.push_notice("No file attached"),
            },
            Command::Attach(path) => {
                let sender = self.sender.clone();
                tokio::spawn(async move {
                    let event = match Attachment::load(&path).await {
                        Ok(attachment) => UiEvent::Attached(attachment),
                        Err(err) => UiEvent::Notice(err.to_string()),
                    };
                    let _ = sender.send(event).await;
                });
            }
            Command::Send(message) => {
                if self.transcript.in_flight() {
                    self.transcript
                        .push_notice("Wait for the current reply to finish");
                    return;
                }
                self.send(message);
            }
        }
        self.input.clear();
    }

    fn send(&mut self, message: String) {
        if !message.is_empty() {
            self.transcript.push_user(message.clone());
        }
        let attachment = self.attachment.take();
        if let Some(attachment) = &attachment {
            self.transcript.push_attachment(&attachment.name);
        }
        self.transcript.begin_exchange();

        let client = self.client.clone();
        let sender = self.sender.clone();
        tokio::spawn(async move {
            let event = match attachment {
                Some(attachment) => match client.send_buffered(&message, Some(attachment)).await {
                    Ok(reply) => UiEvent::Reply(reply),
                    Err(err) => UiEvent::Failed(format!("Network/server error: {}", err)),
                },
                None => {
                    let records = sender.clone();
                    let streamed = client
                        .stream_chat(&message, |record| {
                            let records = records.clone();
                            async move {
                                let _ = records.send(UiEvent::Record(record)).await;
                            }
                        })
                        .await;
                    match streamed {
                        Ok(()) => UiEvent::StreamFinished,
                        Err(err) => UiEvent::Failed(format!("Error streaming response: {}", err)),
                    }
                }
            };
            let _ = sender.send(event).await;
        });
    }

    fn handle_events(&mut self, terminal: &mut TuiTerminal) -> UiResult<bool> {
        while let Ok(event) = self.receiver.try_recv() {
            self.apply(event);
            if self.should_quit {
                return Ok(false);
            }
        }
        self.flush_settled(terminal)?;

        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c')
                {
                    self.should_quit = true;
                    let _ = self.sender.try_send(UiEvent::Quit);
                    return Ok(false);
                }

                match key.code {
                    KeyCode::Esc => {
                        self.should_quit = true;
                        let _ = self.sender.try_send(UiEvent::Quit);
                        return Ok(false);
                    }
                    KeyCode::Enter => {
                        if key.modifiers.contains(KeyModifiers::SHIFT) {
                            self.input.new_line();
                        } else if !self.input.is_empty() || self.attachment.is_some() {
                            self.submit();
                            self.flush_settled(terminal)?;
                        }
                    }
                    KeyCode::Char(c) => {
                        self.input.insert_char(c);
                    }
                    KeyCode::Backspace => {
                        self.input.delete_char();
                    }
                    KeyCode::Left => {
                        self.input.move_left();
                    }
                    KeyCode::Right => {
                        self.input.move_right();
                    }
                    KeyCode::Up => {
                        self.input.move_up();
                    }
                    KeyCode::Down => {
                        self.input.move_down();
                    }
                    KeyCode::Home => {
                        self.input.cursor_x = 0;
                    }
                    KeyCode::End => {
                        self.input.cursor_x = self.input.line_chars();
                    }
                    _ => {}
                }
            }
        }

        Ok(true)
    }
}

pub fn run_tui(client: RelayClient) -> UiResult<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    let (_, rows) = size()?;
    if rows > 0 {
        // Push existing screen content into scrollback without clearing it.
        for _ in 0..rows {
            writeln!(stdout)?;
        }
        stdout.flush()?;
    }
    execute!(stdout, MoveTo(0, 0))?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::with_options(
        backend,
        TerminalOptions {
            viewport: Viewport::Inline(LIVE_HEIGHT + INPUT_HEIGHT),
        },
    )?;

    let mut app = App::new(client);

    let _guard = TerminalGuard::new();

    let client = app.client.clone();
    let sender = app.sender.clone();
    tokio::spawn(async move {
        let notice = match client.health().await {
            Ok(true) => return,
            Ok(false) => "Server reports it is not healthy".to_string(),
            Err(err) => format!("Server unreachable: {}", err),
        };
        let _ = sender.send(UiEvent::Notice(notice)).await;
    });

    app.flush_settled(&mut terminal)?;
    terminal.draw(|f| app.draw(f))?;

    while !app.should_quit {
        if !app.handle_events(&mut terminal)? {
            break;
        }

        terminal.draw(|f| app.draw(f))?;

        std::thread::sleep(Duration::from_millis(10));
    }

    disable_raw_mode()?;
    let mut stdout = io::stdout();
    stdout.flush()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;

    #[test]
    fn input_buffer_shift_enter_inserts_new_line() {
        let mut buffer = InputBuffer::new();
        for ch in "hello".chars() {
            buffer.insert_char(ch);
        }
        buffer.new_line();
        for ch in "world".chars() {
            buffer.insert_char(ch);
        }

        assert_eq!(buffer.contents(), "hello\nworld");
        assert_eq!(buffer.lines.len(), 2);
        assert_eq!(buffer.cursor_y, 1);
    }

    #[test]
    fn input_buffer_edits_multibyte_text() {
        let mut buffer = InputBuffer::new();
        for ch in "grüße".chars() {
            buffer.insert_char(ch);
        }
        buffer.move_left();
        buffer.delete_char();
        buffer.insert_char('s');
        assert_eq!(buffer.contents(), "grüse");
    }

    #[test]
    fn commands_are_recognised() {
        assert_eq!(
            parse_input("/attach ./notes q1.txt ", false),
            Command::Attach("./notes q1.txt".to_string())
        );
        assert_eq!(parse_input("/attach", false), Command::Usage("Usage: /attach <path>"));
        assert_eq!(parse_input(" /detach ", true), Command::Detach);
        assert_eq!(
            parse_input("/attachment please", false),
            Command::Send("/attachment please".to_string())
        );
        assert_eq!(parse_input("  hi there \n", false), Command::Send("hi there".to_string()));
        assert_eq!(parse_input(" \n ", false), Command::Nothing);
    }

    #[test]
    fn empty_input_sends_an_attached_file() {
        assert_eq!(parse_input("", true), Command::Send(String::new()));
        assert_eq!(parse_input("  ", true), Command::Send(String::new()));
    }

    #[tokio::test]
    async fn file_only_submission_starts_an_exchange() {
        let mut app = App::new(RelayClient::new(ClientConfig::new("http://127.0.0.1:9")));
        app.attachment = Some(Attachment {
            name: "report.pdf".to_string(),
            mime_type: "application/pdf".to_string(),
            bytes: b"%PDF".to_vec(),
        });

        app.submit();

        let texts: Vec<&str> = app
            .transcript
            .entries()
            .iter()
            .skip(1)
            .map(|entry| entry.text.as_str())
            .collect();
        assert_eq!(texts[0], "Attached file: report.pdf");
        assert_eq!(app.transcript.entries()[1].speaker, Speaker::User);
        assert!(app.transcript.in_flight());
        assert!(app.transcript.live().unwrap().placeholder);
        assert!(app.attachment.is_none());
        assert!(
            app.transcript
                .entries()
                .iter()
                .all(|entry| !(entry.speaker == Speaker::User && entry.text.is_empty()))
        );
    }

    #[test]
    fn placeholder_renders_with_assistant_header() {
        let mut transcript = Transcript::new();
        transcript.begin_exchange();
        let specs = line_specs(transcript.live().unwrap());
        assert_eq!(specs[0].text, "NEMO:");
        assert!(specs[1].text.contains("NEMO is thinking"));
    }

    #[test]
    fn rendered_height_wraps_long_lines() {
        let mut transcript = Transcript::new();
        transcript.push_user("x".repeat(25));
        let entry = &transcript.entries()[0];
        // Header plus 27 columns of body at width 10.
        assert_eq!(rendered_height(entry, 10), 4);
    }
}
