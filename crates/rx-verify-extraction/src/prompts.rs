//! Prompts for prescription line extraction.
//!
//! The extraction service reads the OCR text of an uploaded prescription and
//! answers with one JSON object per medicine line.

/// System prompt for prescription extraction.
pub const SYSTEM_PROMPT: &str = r#"You are a pharmacy assistant that reads handwritten and printed prescriptions.

Extract every medicine line with the following information:
- medicine_name: The medicine as written (brand name, generic name, or abbreviation)
- dosage: Strength as written (500mg, 250mg/5ml, 1g, etc.)
- frequency: How often it is taken (OD, BD, TDS, 1-0-1, SOS, etc.)
- instructions: Anything else the prescriber wrote (after food, for 5 days, etc.)
- confidence: How sure you are of this line, from 0 to 100

Keep brand names and shorthand exactly as written; do not translate them.
Leave a field empty if it is not on the prescription.

Output JSON with a "lines" array and an "overall_confidence" number."#;

/// User prompt template for extraction.
pub fn make_extraction_prompt(ocr_text: &str) -> String {
    format!(
        r#"Extract all medicine lines from this prescription:

"{}"

Return a JSON object with a "lines" array. Each line should have:
- medicine_name: The medicine name as written
- dosage: Strength ("" if not specified)
- frequency: Frequency shorthand or text ("" if not specified)
- instructions: Other directions ("" if none)
- confidence: Number from 0 to 100
Also return "overall_confidence" for the whole prescription."#,
        ocr_text
    )
}

/// JSON grammar constraint to keep the service's output parseable.
pub const JSON_GRAMMAR: &str = r#"
root ::= object
object ::= "{" ws "\"lines\"" ws ":" ws lines ws "," ws "\"overall_confidence\"" ws ":" ws number ws "}"
lines ::= "[" ws (line (ws "," ws line)*)? ws "]"
line ::= "{" ws
    "\"medicine_name\"" ws ":" ws string ws "," ws
    "\"dosage\"" ws ":" ws string ws "," ws
    "\"frequency\"" ws ":" ws string ws "," ws
    "\"instructions\"" ws ":" ws string ws "," ws
    "\"confidence\"" ws ":" ws number ws
"}"
string ::= "\"" ([^"\\] | "\\" .)* "\""
number ::= [0-9]+ ("." [0-9]+)?
ws ::= [ \t\n]*
"#;

/// Few-shot examples for better extraction accuracy.
pub const FEW_SHOT_EXAMPLES: &[(&str, &str)] = &[
    (
        "Tab. Crocin 650mg 1-0-1 x 5 days after food",
        r#"{"lines":[{"medicine_name":"Tab. Crocin","dosage":"650mg","frequency":"1-0-1","instructions":"x 5 days after food","confidence":94}],"overall_confidence":94}"#,
    ),
    (
        "Augmentin 625 BD\nSyp. Calpol 120mg/5ml SOS",
        r#"{"lines":[{"medicine_name":"Augmentin","dosage":"625mg","frequency":"BD","instructions":"","confidence":88},{"medicine_name":"Syp. Calpol","dosage":"120mg/5ml","frequency":"SOS","instructions":"","confidence":81}],"overall_confidence":85}"#,
    ),
    (
        "Cap Omez 20 HS\nMontair ?? OD",
        r#"{"lines":[{"medicine_name":"Cap Omez","dosage":"20mg","frequency":"HS","instructions":"","confidence":90},{"medicine_name":"Montair","dosage":"","frequency":"OD","instructions":"","confidence":45}],"overall_confidence":68}"#,
    ),
];

/// Build a complete prompt with system context and few-shot examples.
pub fn build_full_prompt(ocr_text: &str, include_examples: bool) -> String {
    let mut prompt = String::new();

    prompt.push_str("<|system|>\n");
    prompt.push_str(SYSTEM_PROMPT);
    prompt.push_str("\n<|end|>\n");

    if include_examples {
        for (input, output) in FEW_SHOT_EXAMPLES {
            prompt.push_str("<|user|>\n");
            prompt.push_str(&make_extraction_prompt(input));
            prompt.push_str("\n<|end|>\n");
            prompt.push_str("<|assistant|>\n");
            prompt.push_str(output);
            prompt.push_str("\n<|end|>\n");
        }
    }

    prompt.push_str("<|user|>\n");
    prompt.push_str(&make_extraction_prompt(ocr_text));
    prompt.push_str("\n<|end|>\n");
    prompt.push_str("<|assistant|>\n");

    prompt
}
