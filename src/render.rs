use std::io::{self, Write};

use phasegraph_core::types::DisplayEvent;

use crate::Format;

/// Prints turn events to the terminal.
#[derive(Clone, Copy)]
pub struct Output {
    format: Format,
}

impl Output {
    pub fn new(format: Format) -> Self {
        Self { format }
    }

    pub fn print(&self, event: &DisplayEvent) {
        match self.format {
            Format::Json => match serde_json::to_string(&event.to_wire()) {
                Ok(line) => println!("{}", line),
                Err(e) => eprintln!("[unprintable event: {}]", e),
            },
            Format::Text => print_text(event),
        }
    }

    /// Close off the transcript of a turn.
    pub fn finish_turn(&self) {
        if let Format::Text = self.format {
            println!();
        }
    }
}

fn print_text(event: &DisplayEvent) {
    match event {
        DisplayEvent::Speaking { delta } => {
            print!("{}", delta);
            io::stdout().flush().ok();
        }
        DisplayEvent::Thinking { message } => eprintln!("[{}]", message),
        DisplayEvent::PhaseChanged {
            from,
            to,
            is_backward,
            reason,
        } => {
            let arrow = if *is_backward { "<-" } else { "->" };
            match reason {
                Some(reason) => eprintln!("\n[phase: {} {} {} ({})]", from, arrow, to, reason),
                None => eprintln!("\n[phase: {} {} {}]", from, arrow, to),
            }
        }
        DisplayEvent::AwaitingInput { prompt, .. } => println!("\n{}", prompt),
        DisplayEvent::Complete { summary } => println!("\n[done] {}", summary),
        DisplayEvent::CheckpointRequested {
            id,
            message,
            options,
        } => {
            eprintln!("\n[CHECKPOINT {}] {}", id, message);
            for (i, option) in options.iter().enumerate() {
                eprintln!("  {}. {}", i + 1, option);
            }
        }
        DisplayEvent::CheckpointResolved { id, action, .. } => {
            eprintln!("[checkpoint {}: {}]", id, action)
        }
        DisplayEvent::Error { code, message } => eprintln!("\n[error {}: {}]", code, message),
        DisplayEvent::Data { kind, payload } => {
            eprintln!("[{}] {}", kind, truncate(&payload.to_string(), 200))
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        s
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        &s[..end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("héllo", 2), "h");
        assert_eq!(truncate("abcdef", 3), "abc");
    }
}
