//! HTML fragments for the exam-paper PDF renderer.
//!
//! Pure functions of a typed [`PaperDocument`]. Every interpolated value goes
//! through [`escape_html`]; nothing here performs I/O.

use serde::Serialize;
use std::fmt::Write as _;

#[derive(Debug, Clone, PartialEq)]
pub struct PaperDocument {
    pub school_name: String,
    pub title: String,
    pub subject: String,
    pub class_name: String,
    pub exam_date: Option<String>,
    pub duration_minutes: i64,
    pub total_marks: f64,
    pub instructions: String,
    pub questions: Vec<PaperQuestion>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaperQuestion {
    pub text: String,
    pub question_type: String,
    pub marks: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedPaper {
    pub header: String,
    pub paper_info: String,
    pub instructions: String,
    pub questions: String,
}

pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
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

fn fmt_marks(v: f64) -> String {
    if v.fract() == 0.0 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}

fn fmt_duration(minutes: i64) -> String {
    match (minutes / 60, minutes % 60) {
        (0, m) => format!("{m} minutes"),
        (1, 0) => "1 hour".to_string(),
        (h, 0) => format!("{h} hours"),
        (h, m) => format!("{h} h {m} min"),
    }
}

pub fn render_header(doc: &PaperDocument) -> String {
    format!(
        "<div class=\"header\"><h1>{}</h1><h2>{}</h2></div>",
        escape_html(&doc.school_name),
        escape_html(&doc.title)
    )
}

pub fn render_paper_info(doc: &PaperDocument) -> String {
    let date = doc.exam_date.as_deref().unwrap_or("");
    format!(
        "<table class=\"paper-info\">\
         <tr><td>Subject: {}</td><td>Class: {}</td></tr>\
         <tr><td>Date: {}</td><td>Duration: {}</td></tr>\
         <tr><td colspan=\"2\">Total marks: {}</td></tr>\
         </table>",
        escape_html(&doc.subject),
        escape_html(&doc.class_name),
        escape_html(date),
        fmt_duration(doc.duration_minutes),
        fmt_marks(doc.total_marks)
    )
}

/// One `<li>` per non-blank line of the free-text instructions.
pub fn render_instructions(doc: &PaperDocument) -> String {
    let items: Vec<String> = doc
        .instructions
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| format!("<li>{}</li>", escape_html(l)))
        .collect();
    if items.is_empty() {
        return String::new();
    }
    format!(
        "<div class=\"instructions\"><h3>Instructions</h3><ol>{}</ol></div>",
        items.join("")
    )
}

pub fn render_questions(doc: &PaperDocument) -> String {
    let mut out = String::from("<ol class=\"questions\">");
    for q in &doc.questions {
        let _ = write!(
            out,
            "<li class=\"question {}\"><p>{}</p><span class=\"marks\">[{}]</span></li>",
            escape_html(&q.question_type),
            escape_html(&q.text),
            fmt_marks(q.marks)
        );
    }
    out.push_str("</ol>");
    out
}

pub fn render_paper(doc: &PaperDocument) -> RenderedPaper {
    RenderedPaper {
        header: render_header(doc),
        paper_info: render_paper_info(doc),
        instructions: render_instructions(doc),
        questions: render_questions(doc),
    }
}
