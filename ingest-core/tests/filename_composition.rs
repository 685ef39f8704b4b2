//! End-to-end filename composition scenarios lifted from real-world title
//! shapes: duplicate codes embedded in the title, mixed-case codes, and
//! titles that would otherwise overflow a 255-byte basename limit.

use ingest_core::parser;
use ingest_core::renamer;

#[test]
fn full_pipeline_for_a_typical_release() {
    let filename = "sone-760 English Subbed The Same Commute Train As Always.mp4";

    let code = parser::extract_code(filename).expect("code should be found");
    let subtitle = parser::detect_subtitle(filename);
    assert_eq!(code, "SONE-760");
    assert_eq!(subtitle, "English Sub");

    let composed = renamer::compose_filename(
        "Ruri Saijo",
        &subtitle,
        &code,
        "The Same Commute Train As Always",
        ".mp4",
    );

    assert_eq!(
        composed,
        "Ruri Saijo - [English Sub] SONE-760 The Same Commute Train As Always.mp4"
    );
}

#[test]
fn title_with_embedded_code_is_not_duplicated() {
    let filename = "SONE-760-C.mp4";
    let code = parser::extract_code(filename).unwrap();
    let subtitle = parser::detect_subtitle(filename);

    let composed = renamer::compose_filename("Actress", &subtitle, &code, "SONE-760 Censored", ".mp4");
    assert_eq!(composed.matches("SONE-760").count(), 1);
    assert_eq!(subtitle, "No Sub");
}
