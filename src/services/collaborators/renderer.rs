use super::Renderer;
use anyhow::{Context, Result};
use async_trait::async_trait;
use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, StringFormat, Stream, dictionary};

const PAGE_WIDTH: f32 = 595.0;
const PAGE_HEIGHT: f32 = 842.0;
const MARGIN: f32 = 56.0;
const BODY_SIZE: f32 = 11.0;

const REGULAR_FONT: &str = "F1";
const BOLD_FONT: &str = "F2";

#[derive(Debug, Clone, PartialEq)]
enum Block {
    Heading(usize, String),
    Bullet(String),
    Paragraph(String),
    Gap,
}

/// Renders Markdown as plain text lines on A4 pages using the built-in
/// Helvetica fonts (WinAnsi encoding; characters outside it print as `?`).
#[derive(Debug, Clone, Default)]
pub struct PdfRenderer;

#[async_trait]
impl Renderer for PdfRenderer {
    async fn render(&self, markdown: &str) -> Result<Vec<u8>> {
        let markdown = markdown.to_string();
        tokio::task::spawn_blocking(move || render_pdf(&markdown))
            .await
            .context("PDF rendering task panicked")?
    }
}

fn strip_inline(text: &str) -> String {
    text.replace("**", "")
        .replace("__", "")
        .replace('`', "")
        .trim()
        .to_string()
}

fn parse_markdown(markdown: &str) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut in_fence = false;

    for raw in markdown.lines() {
        let line = raw.trim_end();
        let trimmed = line.trim_start();

        if trimmed.starts_with("```") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            blocks.push(Block::Paragraph(line.to_string()));
            continue;
        }
        if trimmed.is_empty() {
            if blocks.last().is_some_and(|b| *b != Block::Gap) {
                blocks.push(Block::Gap);
            }
            continue;
        }
        if trimmed.chars().all(|c| c == '-' || c == '*' || c == '_') && trimmed.len() >= 3 {
            blocks.push(Block::Gap);
            continue;
        }

        let hashes = trimmed.chars().take_while(|c| *c == '#').count();
        if (1..=6).contains(&hashes) && trimmed[hashes..].starts_with(' ') {
            blocks.push(Block::Heading(hashes, strip_inline(&trimmed[hashes..])));
            continue;
        }

        if let Some(item) = trimmed
            .strip_prefix("- ")
            .or_else(|| trimmed.strip_prefix("* "))
            .or_else(|| trimmed.strip_prefix("+ "))
        {
            blocks.push(Block::Bullet(strip_inline(item)));
            continue;
        }

        let digits = trimmed.chars().take_while(|c| c.is_ascii_digit()).count();
        if digits > 0 && trimmed[digits..].starts_with(". ") {
            blocks.push(Block::Bullet(format!(
                "{}. {}",
                &trimmed[..digits],
                strip_inline(&trimmed[digits + 2..])
            )));
            continue;
        }

        let text = strip_inline(trimmed.trim_start_matches('>'));
        blocks.push(Block::Paragraph(text));
    }

    blocks
}

/// Greedy word wrap by an approximate glyph budget. Words longer than the
/// budget (and text without spaces, as in CJK) are split by characters.
fn wrap(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(8);
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let mut word = word.to_string();
        while word.chars().count() > max_chars {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            let split: String = word.chars().take(max_chars).collect();
            word = word.chars().skip(max_chars).collect();
            lines.push(split);
        }
        let needed = current.chars().count() + word.chars().count() + usize::from(!current.is_empty());
        if needed > max_chars && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(&word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

fn encode_win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c {
            '€' => 0x80,
            '…' => 0x85,
            '‘' => 0x91,
            '’' => 0x92,
            '“' => 0x93,
            '”' => 0x94,
            '•' => 0x95,
            '–' => 0x96,
            '—' => 0x97,
            c if (c as u32) < 0x100 && !c.is_control() => c as u32 as u8,
            _ => b'?',
        })
        .collect()
}

struct PageWriter {
    pages: Vec<Vec<Operation>>,
    current: Vec<Operation>,
    cursor: f32,
}

impl PageWriter {
    fn new() -> Self {
        Self {
            pages: Vec::new(),
            current: Vec::new(),
            cursor: PAGE_HEIGHT - MARGIN,
        }
    }

    fn break_page(&mut self) {
        self.pages.push(std::mem::take(&mut self.current));
        self.cursor = PAGE_HEIGHT - MARGIN;
    }

    fn skip(&mut self, amount: f32) {
        self.cursor -= amount;
        if self.cursor < MARGIN {
            self.break_page();
        }
    }

    fn line(&mut self, font: &str, size: f32, indent: f32, text: &str) {
        let leading = size * 1.45;
        if self.cursor - leading < MARGIN {
            self.break_page();
        }
        self.cursor -= leading;
        self.current.extend([
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec![font.into(), size.into()]),
            Operation::new("Td", vec![(MARGIN + indent).into(), self.cursor.into()]),
            Operation::new(
                "Tj",
                vec![Object::String(encode_win_ansi(text), StringFormat::Literal)],
            ),
            Operation::new("ET", vec![]),
        ]);
    }

    fn paragraph(&mut self, font: &str, size: f32, indent: f32, prefix: &str, text: &str) {
        let usable = PAGE_WIDTH - 2.0 * MARGIN - indent;
        let budget = (usable / (size * 0.5)) as usize;
        let wrapped = wrap(text, budget.saturating_sub(prefix.chars().count()));
        let padding = " ".repeat(prefix.chars().count());
        for (i, line) in wrapped.iter().enumerate() {
            let lead = if i == 0 { prefix } else { padding.as_str() };
            self.line(font, size, indent, &format!("{}{}", lead, line));
        }
    }

    fn finish(mut self) -> Vec<Vec<Operation>> {
        if !self.current.is_empty() || self.pages.is_empty() {
            self.pages.push(self.current);
        }
        self.pages
    }
}

fn render_pdf(markdown: &str) -> Result<Vec<u8>> {
    let mut writer = PageWriter::new();
    for block in parse_markdown(markdown) {
        match block {
            Block::Heading(level, text) => {
                let size = match level {
                    1 => 18.0,
                    2 => 15.0,
                    _ => 13.0,
                };
                writer.skip(size * 0.4);
                writer.paragraph(BOLD_FONT, size, 0.0, "", &text);
            }
            Block::Bullet(text) => writer.paragraph(REGULAR_FONT, BODY_SIZE, 12.0, "• ", &text),
            Block::Paragraph(text) => writer.paragraph(REGULAR_FONT, BODY_SIZE, 0.0, "", &text),
            Block::Gap => writer.skip(BODY_SIZE * 0.6),
        }
    }

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let regular_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let bold_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica-Bold",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            REGULAR_FONT => regular_id,
            BOLD_FONT => bold_id,
        },
    });

    let mut kids: Vec<Object> = Vec::new();
    for operations in writer.finish() {
        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let page_count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_count,
            "Resources" => resources_id,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Real(PAGE_WIDTH),
                Object::Real(PAGE_HEIGHT),
            ],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer)
        .context("Failed to serialize PDF document")?;
    Ok(buffer)
}
