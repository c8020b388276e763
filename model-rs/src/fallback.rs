//! Static stylesheets served when generation fails or times out

use crate::era::Era;

const WEB1996: &str = r#"body { font-family: "Times New Roman", serif; background-color: #C0C0C0; color: #000; }
h1, h2, h3 { color: #000080; font-weight: bold; }
a { color: #0000EE; text-decoration: underline; }
a:visited { color: #551A8B; }
table { border: 2px outset #FFF; }
button, input[type="submit"] { background: #C0C0C0; color: #000; border: 2px outset #FFF; padding: 2px 6px; }
input, textarea { background: #FFF; border: 2px inset #808080; padding: 2px; }
"#;

const WIN95: &str = r#"body { font-family: "MS Sans Serif", Arial, sans-serif; background-color: #C0C0C0; color: #000; }
h1, h2, h3 { color: #000080; font-weight: bold; }
a { color: #0000FF; text-decoration: underline; }
button, input[type="submit"], input[type="button"] {
    background: #C0C0C0;
    border: 2px solid;
    border-color: #DFDFDF #808080 #808080 #DFDFDF;
    padding: 4px 8px;
}
button:active { border-color: #808080 #DFDFDF #DFDFDF #808080; }
input, textarea { background: #FFF; border: 2px solid #808080; padding: 4px; }
"#;

const WIN98: &str = r#"body { font-family: Tahoma, Arial, sans-serif; background-color: #CCCCCC; color: #000; }
h1, h2, h3 { color: #000080; font-weight: bold; }
a { color: #0000FF; text-decoration: underline; }
button, input[type="submit"] {
    background: #CCCCCC;
    border: 2px solid;
    border-color: #E0E0E0 #808080 #808080 #E0E0E0;
    border-radius: 2px;
    padding: 4px 8px;
}
input, textarea { background: #FFF; border: 1px solid #999; padding: 4px; }
"#;

const WINXP: &str = r#"body { font-family: "Segoe UI", Tahoma, Arial, sans-serif; background: #ECE9D8; color: #000; }
h1, h2, h3 { color: #0A246A; font-weight: bold; }
a { color: #0066CC; text-decoration: underline; }
button, input[type="submit"] {
    background: linear-gradient(to bottom, #FFFFFF, #D6D0C5);
    border: 1px solid #003C74;
    border-radius: 3px;
    padding: 4px 12px;
}
input, textarea { background: #FFF; border: 1px solid #7F9DB9; padding: 4px; }
"#;

/// Minimal always-valid stylesheet for an era
pub fn fallback_css(era: Era) -> &'static str {
    match era {
        Era::Web1996 => WEB1996,
        Era::Win95 => WIN95,
        Era::Win98 => WIN98,
        Era::Winxp => WINXP,
    }
}
