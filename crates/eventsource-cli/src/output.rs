//! Output formatting for eventsource-cli (table, json, csv)

use clap::ValueEnum;
use colored::Colorize;
use eventsource::MessageEvent;
use serde::Serialize;
use tabled::{Table, Tabled};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable lines (default)
    #[default]
    Table,
    /// One JSON object per event
    Json,
    /// CSV rows: type, id, data
    Csv,
}

impl OutputFormat {
    /// Parse a format name from the config file
    pub fn from_name(name: &str) -> Option<Self> {
        <Self as ValueEnum>::from_str(name, true).ok()
    }
}

impl From<OutputFormat> for &str {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Table => "table",
            OutputFormat::Json => "json",
            OutputFormat::Csv => "csv",
        }
    }
}

/// Context for output rendering
pub struct OutputContext {
    pub format: OutputFormat,
    pub quiet: bool,
}

impl OutputContext {
    pub fn new(format: OutputFormat, no_color: bool, quiet: bool) -> Self {
        if no_color {
            colored::control::set_override(false);
        }
        Self { format, quiet }
    }

    /// Print a success message (unless in quiet mode)
    pub fn success(&self, msg: &str) {
        if !self.quiet {
            eprintln!("{}", msg.green());
        }
    }

    /// Print an info message (unless in quiet mode)
    pub fn info(&self, msg: &str) {
        if !self.quiet {
            eprintln!("{}", msg);
        }
    }

    /// Print a warning message
    pub fn warn(&self, msg: &str) {
        eprintln!("{}", msg.yellow());
    }

    /// Print an error message
    pub fn error(&self, msg: &str) {
        eprintln!("{}", msg.red());
    }

    /// Print a header line before the first event, if the format has one
    pub fn print_header(&self) {
        if self.format == OutputFormat::Csv {
            println!("type,id,last_event_id,data");
        }
    }

    /// Print one decoded event in the configured format
    pub fn print_event(&self, event: &MessageEvent) {
        println!("{}", format_event(self.format, event));
    }

    /// Print a table of rows (summary after the stream stops)
    pub fn print<T: Tabled + Serialize>(&self, data: &[T]) {
        match self.format {
            OutputFormat::Table => {
                if data.is_empty() {
                    if !self.quiet {
                        eprintln!("No events");
                    }
                } else {
                    eprintln!("{}", Table::new(data));
                }
            }
            // Machine-readable formats keep stdout to events only
            OutputFormat::Json | OutputFormat::Csv => {}
        }
    }
}

/// Render an event as a single line
pub fn format_event(format: OutputFormat, event: &MessageEvent) -> String {
    match format {
        OutputFormat::Table => {
            let id = event
                .id
                .as_deref()
                .map(|id| format!(" #{}", id))
                .unwrap_or_default();
            format!(
                "[{}]{} {}",
                event.event_type.cyan(),
                id,
                event.data.replace('\n', "\n    ")
            )
        }
        OutputFormat::Json => serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string()),
        OutputFormat::Csv => [
            event.event_type.as_str(),
            event.id.as_deref().unwrap_or(""),
            event.last_event_id.as_str(),
            event.data.as_str(),
        ]
        .iter()
        .map(|v| escape_csv(v))
        .collect::<Vec<_>>()
        .join(","),
    }
}

/// Escape a value for CSV output
fn escape_csv(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Per-type event counts for the summary table
#[derive(Debug, Tabled, Serialize)]
pub struct SummaryRow {
    #[tabled(rename = "Event")]
    pub event_type: String,
    #[tabled(rename = "Count")]
    pub count: usize,
    #[tabled(rename = "Last ID")]
    pub last_id: String,
}
