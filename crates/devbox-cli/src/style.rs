use std::env;

use color_eyre::owo_colors::OwoColorize;
use devbox_core::CommandStatus;

pub struct Style {
    enabled: bool,
}

impl Style {
    pub fn new(force_no_color: bool, is_tty: bool) -> Self {
        let env_no_color = env::var_os("NO_COLOR").is_some();
        Self {
            enabled: !(force_no_color || env_no_color) && is_tty,
        }
    }

    pub fn status(&self, status: &CommandStatus, text: &str) -> String {
        let (symbol, tone) = match status {
            CommandStatus::Ok => ("✔", Tone::Green),
            CommandStatus::UserError => ("✗", Tone::Yellow),
            CommandStatus::Failure => ("✖", Tone::Red),
        };
        let line = format!("{symbol} {text}");
        self.paint(&line, tone, true)
    }

    /// One audit finding: `pass`, `warn` or `fail`.
    pub fn check(&self, status: &str, name: &str, detail: &str) -> String {
        let (label, tone) = match status {
            "pass" => ("PASS", Tone::Green),
            "warn" => ("WARN", Tone::Yellow),
            _ => ("FAIL", Tone::Red),
        };
        let label = self.paint(&format!("[{label}]"), tone, true);
        if detail.is_empty() {
            format!("{label} {name}")
        } else {
            format!("{label} {name}: {detail}")
        }
    }

    pub fn info(&self, text: &str) -> String {
        self.paint(text, Tone::Blue, false)
    }

    fn paint(&self, text: &str, tone: Tone, bold: bool) -> String {
        if !self.enabled {
            return text.to_string();
        }
        let colored = match tone {
            Tone::Green => text.green().to_string(),
            Tone::Yellow => text.yellow().to_string(),
            Tone::Red => text.red().to_string(),
            Tone::Blue => text.cyan().to_string(),
        };
        if bold {
            colored.bold().to_string()
        } else {
            colored
        }
    }
}

enum Tone {
    Green,
    Yellow,
    Red,
    Blue,
}
