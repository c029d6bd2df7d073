//! Page extraction from generated PDFs.

use docqa_rag::loader::PdfPageSource;
use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, Stream, dictionary};

/// Build a PDF with one page per entry of `texts`.
fn build_pdf(texts: &[&str]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
        "Encoding" => "WinAnsiEncoding",
    });

    let mut kids: Vec<Object> = Vec::new();
    for text in texts {
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![72.into(), 720.into()]),
                Operation::new("Tj", vec![Object::string_literal(*text)]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}

#[test]
fn pages_are_extracted_lazily_in_order() {
    let bytes = build_pdf(&["Attention is all you need", "Transformers use self attention"]);
    let mut source = PdfPageSource::from_bytes("paper.pdf", &bytes).unwrap();
    assert_eq!(source.remaining(), 2);

    let first = source.next().unwrap().unwrap();
    assert_eq!(first.number, 1);
    assert!(first.text.contains("Attention is all you need"));
    assert_eq!(source.remaining(), 1);

    let second = source.next().unwrap().unwrap();
    assert_eq!(second.number, 2);
    assert!(second.text.contains("self attention"));
    assert!(source.next().is_none());
}

#[test]
fn open_reads_a_pdf_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("saved.pdf");
    std::fs::write(&path, build_pdf(&["Saved upload"])).unwrap();

    let source = PdfPageSource::open(&path).unwrap();
    assert_eq!(source.filename(), "saved.pdf");
    let pages: Vec<_> = source.map(|p| p.unwrap()).collect();
    assert_eq!(pages.len(), 1);
    assert!(pages[0].text.contains("Saved upload"));
}
