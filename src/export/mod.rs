//! Export of analytic cards as paginated PDF reports.

pub mod font;
pub mod layout;
pub mod pdf;

use crate::protocol::FileApiCard;

pub use layout::{
    bar_layout, layout_card, BarGeometry, Document, DrawOp, Page, PageCursor, PageSize,
};

pub const PDF_CONTENT_TYPE: &str = "application/pdf";

/// A rendered document ready to be sent as a download.
#[derive(Debug, Clone)]
pub struct ExportedFile {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub content_type: &'static str,
}

/// 导出分析卡片为PDF
///
/// ## 功能说明
/// 先排版为显示列表，再渲染为PDF字节；文件名由表格标题派生，
/// 非ASCII字母数字字符替换为 `_`。
pub fn export_pdf(card: &FileApiCard) -> ExportedFile {
    let document = layout_card(card);
    let bytes = pdf::render(&document);
    let file_name = file_name_for(layout::document_title(card));

    tracing::info!(
        file_name = %file_name,
        pages = document.pages.len(),
        bytes = bytes.len(),
        "Exported analytic card"
    );

    ExportedFile {
        bytes,
        file_name,
        content_type: PDF_CONTENT_TYPE,
    }
}

/// `Q1 Sales/Report` -> `Q1_Sales_Report.pdf`
pub fn file_name_for(title: &str) -> String {
    let stem: String = title
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("{}.pdf", stem)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name_sanitized() {
        assert_eq!(file_name_for("Q1 Sales/Report"), "Q1_Sales_Report.pdf");
        assert_eq!(file_name_for("Ünïcode"), "_n_code.pdf");
    }

    #[test]
    fn test_untitled_card_exports() {
        let file = export_pdf(&FileApiCard::default());
        assert_eq!(file.file_name, "Untitled.pdf");
        assert_eq!(file.content_type, "application/pdf");
        assert!(file.bytes.starts_with(b"%PDF-"));
    }
}
