//! Minimal PDF 1.4 writer for laid-out documents.
//!
//! Uses the standard Helvetica faces (`/F1` regular, `/F2` bold) with
//! WinAnsi encoding, so no fonts are embedded. Output carries no timestamps
//! and is byte-for-byte reproducible.

use std::fmt::Write as _;

use super::font::{text_width, PT_PER_MM};
use super::layout::{Align, Color, Document, DrawOp, PageSize};

/// Render a laid-out document into PDF bytes.
pub fn render(document: &Document) -> Vec<u8> {
    let page_count = document.pages.len();
    // 1 catalog, 2 page tree, 3-4 fonts, then a page and a content stream per page.
    let page_id = |index: usize| 5 + index * 2;
    let content_id = |index: usize| 6 + index * 2;

    let mut objects: Vec<Vec<u8>> = Vec::with_capacity(4 + page_count * 2);
    objects.push(b"<< /Type /Catalog /Pages 2 0 R >>".to_vec());

    let kids: Vec<String> = (0..page_count).map(|i| format!("{} 0 R", page_id(i))).collect();
    objects.push(
        format!("<< /Type /Pages /Kids [{}] /Count {} >>", kids.join(" "), page_count).into_bytes(),
    );
    objects.push(font_object("Helvetica"));
    objects.push(font_object("Helvetica-Bold"));

    let width_pt = document.size.width * PT_PER_MM;
    let height_pt = document.size.height * PT_PER_MM;

    for (index, page) in document.pages.iter().enumerate() {
        objects.push(
            format!(
                "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {} {}] \
                 /Resources << /Font << /F1 3 0 R /F2 4 0 R >> >> /Contents {} 0 R >>",
                num(width_pt),
                num(height_pt),
                content_id(index)
            )
            .into_bytes(),
        );

        let stream = content_stream(&page.ops, document.size);
        let mut object = format!("<< /Length {} >>\nstream\n", stream.len()).into_bytes();
        object.extend_from_slice(&stream);
        object.extend_from_slice(b"\nendstream");
        objects.push(object);
    }

    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n%\xE2\xE3\xCF\xD3\n");

    let mut offsets = Vec::with_capacity(objects.len());
    for (index, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj\n", index + 1).as_bytes());
        out.extend_from_slice(body);
        out.extend_from_slice(b"\nendobj\n");
    }

    let xref_offset = out.len();
    let mut xref = format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1);
    for offset in offsets {
        let _ = writeln!(xref, "{:010} 00000 n ", offset);
    }
    let _ = write!(
        xref,
        "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
        objects.len() + 1,
        xref_offset
    );
    out.extend_from_slice(xref.as_bytes());
    out
}

fn font_object(base: &str) -> Vec<u8> {
    format!(
        "<< /Type /Font /Subtype /Type1 /BaseFont /{} /Encoding /WinAnsiEncoding >>",
        base
    )
    .into_bytes()
}

fn content_stream(ops: &[DrawOp], size: PageSize) -> Vec<u8> {
    let page_height = size.height;
    let mut out = Vec::new();

    for op in ops {
        match op {
            DrawOp::Text { x, y, text, size, bold, color, align } => {
                let x = match align {
                    Align::Left => *x,
                    Align::Center => x - text_width(text, *size, *bold) / 2.0,
                    Align::Right => x - text_width(text, *size, *bold),
                };
                let header = format!(
                    "BT /{} {} Tf {} rg {} {} Td (",
                    if *bold { "F2" } else { "F1" },
                    num(*size),
                    rgb(*color),
                    num(x * PT_PER_MM),
                    num((page_height - y) * PT_PER_MM),
                );
                out.extend_from_slice(header.as_bytes());
                out.extend_from_slice(&encode_text(text));
                out.extend_from_slice(b") Tj ET\n");
            }
            DrawOp::Rect { x, y, width, height, fill, stroke } => {
                let paint = match (fill, stroke) {
                    (Some(_), Some(_)) => "B",
                    (Some(_), None) => "f",
                    (None, Some(_)) => "S",
                    (None, None) => continue,
                };
                let mut line = String::from("q ");
                if let Some(color) = fill {
                    let _ = write!(line, "{} rg ", rgb(*color));
                }
                if let Some(color) = stroke {
                    let _ = write!(line, "{} RG 0.5 w ", rgb(*color));
                }
                let _ = writeln!(
                    line,
                    "{} {} {} {} re {} Q",
                    num(x * PT_PER_MM),
                    num((page_height - y - height) * PT_PER_MM),
                    num(width * PT_PER_MM),
                    num(height * PT_PER_MM),
                    paint
                );
                out.extend_from_slice(line.as_bytes());
            }
            DrawOp::Line { x1, y1, x2, y2, color } => {
                let line = format!(
                    "q {} RG 0.5 w {} {} m {} {} l S Q\n",
                    rgb(*color),
                    num(x1 * PT_PER_MM),
                    num((page_height - y1) * PT_PER_MM),
                    num(x2 * PT_PER_MM),
                    num((page_height - y2) * PT_PER_MM),
                );
                out.extend_from_slice(line.as_bytes());
            }
        }
    }

    out
}

/// Fixed two-decimal number with trailing zeros trimmed.
fn num(value: f64) -> String {
    let formatted = format!("{:.2}", value);
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    match trimmed {
        "" | "-0" => "0".to_string(),
        other => other.to_string(),
    }
}

fn rgb(Color(r, g, b): Color) -> String {
    format!(
        "{} {} {}",
        num(r as f64 / 255.0),
        num(g as f64 / 255.0),
        num(b as f64 / 255.0)
    )
}

/// Latin-1 bytes for a PDF string literal; other characters become `?`.
fn encode_text(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '(' | ')' | '\\' => {
                out.push(b'\\');
                out.push(c as u8);
            }
            '\t' | '\r' | '\n' => out.push(b' '),
            c if (c as u32) < 0x20 => {}
            c if (c as u32) < 0x7F || (0xA0..=0xFF).contains(&(c as u32)) => {
                out.push(c as u32 as u8)
            }
            _ => out.push(b'?'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::layout::Page;

    #[test]
    fn test_num_formatting() {
        assert_eq!(num(1.0), "1");
        assert_eq!(num(595.2755), "595.28");
        assert_eq!(num(0.5), "0.5");
        assert_eq!(num(-0.001), "0");
    }

    #[test]
    fn test_encode_text_escapes_and_replaces() {
        assert_eq!(encode_text("a(b)\\"), b"a\\(b\\)\\\\".to_vec());
        assert_eq!(encode_text("café"), vec![b'c', b'a', b'f', 0xE9]);
        assert_eq!(encode_text("日本"), b"??".to_vec());
    }

    #[test]
    fn test_render_structure() {
        let document = Document {
            size: PageSize::A4_PORTRAIT,
            pages: vec![Page::default(), Page::default()],
        };
        let bytes = render(&document);
        let text = String::from_utf8_lossy(&bytes);

        assert!(bytes.starts_with(b"%PDF-1.4"));
        assert!(text.contains("/Count 2"));
        assert!(text.contains("/Kids [5 0 R 7 0 R]"));
        assert!(text.trim_end().ends_with("%%EOF"));
        assert_eq!(render(&document), bytes);
    }
}
