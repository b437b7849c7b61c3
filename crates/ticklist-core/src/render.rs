use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::datetime::format_display;
use crate::task::Priority;
use crate::view::{EMPTY_PLACEHOLDER, RowView, ViewModel};

/// Output target for the projected list. Each call rebuilds the whole
/// output from the view model.
pub trait Surface {
    fn render(&mut self, view: &ViewModel) -> anyhow::Result<()>;
}

pub fn color_enabled(cfg: &Config) -> anyhow::Result<bool> {
    let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
    match color_cfg.to_ascii_lowercase().as_str() {
        "on" | "yes" | "true" | "1" => Ok(true),
        "off" | "no" | "false" | "0" => Ok(false),
        other => Err(anyhow!("invalid color setting: {other}")),
    }
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Browser-style markup: the `<li>` rows of the task list and the count
/// text, kept as strings the caller can splice into a page.
#[derive(Debug, Clone)]
pub struct HtmlSurface {
    date_format: String,
    list_html: String,
    count_text: String,
    renders: usize,
}

impl HtmlSurface {
    pub fn new(date_format: &str) -> Self {
        Self {
            date_format: date_format.to_string(),
            list_html: String::new(),
            count_text: String::new(),
            renders: 0,
        }
    }

    pub fn list_html(&self) -> &str {
        &self.list_html
    }

    pub fn count_text(&self) -> &str {
        &self.count_text
    }

    pub fn renders(&self) -> usize {
        self.renders
    }

    fn row_html(&self, row: &RowView) -> String {
        let checked = if row.completed { " checked" } else { "" };
        let done = if row.completed { " done" } else { "" };
        let due = row
            .due_label(&self.date_format)
            .map(|label| format!("\n    <small>{}</small>", escape_html(&label)))
            .unwrap_or_default();

        format!(
            "<li class=\"task-item\" data-id=\"{id}\" draggable=\"true\">\n  \
             <div class=\"task-left\">\n    \
             <input type=\"checkbox\"{checked} />\n    \
             <span class=\"task-text{done}\">{text}</span>\n    \
             <span class=\"{class}\">{badge}</span>{due}\n  \
             </div>\n  \
             <div class=\"actions\">\n    \
             <button class=\"edit\">✎</button>\n    \
             <button class=\"delete\">🗑</button>\n  \
             </div>\n\
             </li>\n",
            id = escape_html(&row.id),
            text = escape_html(&row.text),
            class = row.priority.css_class(),
            badge = row.priority_badge(),
        )
    }
}

impl Surface for HtmlSurface {
    #[tracing::instrument(skip(self, view), fields(rows = view.rows.len()))]
    fn render(&mut self, view: &ViewModel) -> anyhow::Result<()> {
        self.list_html = if view.is_empty() {
            format!("<li class=\"task-item\"><div>{EMPTY_PLACEHOLDER}</div></li>\n")
        } else {
            view.rows.iter().map(|row| self.row_html(row)).collect()
        };
        self.count_text = view.summary.to_string();
        self.renders += 1;
        Ok(())
    }
}

/// Aligned terminal table followed by the summary line.
pub struct TableSurface<W: Write> {
    out: W,
    color: bool,
    date_format: String,
}

impl TableSurface<io::Stdout> {
    pub fn stdout(cfg: &Config) -> anyhow::Result<Self> {
        let color = color_enabled(cfg)? && io::stdout().is_terminal();
        Ok(Self::new(io::stdout(), color, &cfg.date_format()))
    }
}

impl<W: Write> TableSurface<W> {
    pub fn new(out: W, color: bool, date_format: &str) -> Self {
        Self {
            out,
            color,
            date_format: date_format.to_string(),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }

    fn priority_cell(&self, priority: Priority) -> String {
        match priority {
            Priority::High => self.paint(priority.as_str(), "31"),
            Priority::Medium => self.paint(priority.as_str(), "33"),
            Priority::Low => priority.as_str().to_string(),
        }
    }
}

impl<W: Write> Surface for TableSurface<W> {
    #[tracing::instrument(skip(self, view), fields(rows = view.rows.len()))]
    fn render(&mut self, view: &ViewModel) -> anyhow::Result<()> {
        if view.is_empty() {
            writeln!(self.out, "{EMPTY_PLACEHOLDER}")?;
        } else {
            let headers = vec![
                "ID".to_string(),
                "Done".to_string(),
                "Priority".to_string(),
                "Due".to_string(),
                "Text".to_string(),
            ];

            let mut rows = Vec::with_capacity(view.rows.len());
            for row in &view.rows {
                let id = self.paint(row.id.get(..8).unwrap_or(&row.id), "33");
                let done = if row.completed { "[x]" } else { "[ ]" }.to_string();
                let due = row
                    .deadline
                    .map(|dt| format_display(&dt, &self.date_format))
                    .unwrap_or_default();
                let text = if row.completed {
                    self.paint(&row.text, "2")
                } else {
                    row.text.clone()
                };
                rows.push(vec![id, done, self.priority_cell(row.priority), due, text]);
            }

            write_table(&mut self.out, headers, rows)?;
        }

        writeln!(self.out, "{}", view.summary)?;
        self.out.flush()?;
        Ok(())
    }
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for (header, width) in headers.iter().zip(widths.iter().copied()) {
        write!(writer, "{header:width$} ")?;
    }
    writeln!(writer)?;

    for width in widths.iter().copied() {
        write!(writer, "{:-<width$} ", "")?;
    }
    writeln!(writer)?;

    for row in rows {
        for (cell, width) in row.iter().zip(widths.iter().copied()) {
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = width.saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}
