//! Local template-based generator
//!
//! Builds era CSS from a fixed palette per era. It needs no model, so the
//! binary can serve styles out of the box; feedback presets nudge the output
//! in the direction the user asked for.

use crate::generator::{GenerationRequest, GeneratorError, StyleGenerator};
use async_trait::async_trait;
use retroweb_model::{Era, FeedbackPreset};
use tracing::debug;

struct Palette {
    background: &'static str,
    surface: &'static str,
    text: &'static str,
    accent: &'static str,
    fonts: &'static str,
    bevel: &'static str,
    radius: &'static str,
}

fn palette(era: Era) -> Palette {
    match era {
        Era::Web1996 => Palette {
            background: "#C0C0C0",
            surface: "#FFFFFF",
            text: "#000000",
            accent: "#0000EE",
            fonts: "\"Times New Roman\", serif",
            bevel: "border: 2px outset #FFFFFF",
            radius: "0",
        },
        Era::Win95 => Palette {
            background: "#008080",
            surface: "#C0C0C0",
            text: "#000000",
            accent: "#000080",
            fonts: "\"MS Sans Serif\", Arial, sans-serif",
            bevel: "border: 2px solid; border-color: #DFDFDF #808080 #808080 #DFDFDF",
            radius: "0",
        },
        Era::Win98 => Palette {
            background: "#CCCCCC",
            surface: "#D4D0C8",
            text: "#000000",
            accent: "#000080",
            fonts: "Tahoma, Arial, sans-serif",
            bevel: "border: 2px solid; border-color: #FFFFFF #404040 #404040 #FFFFFF",
            radius: "2px",
        },
        Era::Winxp => Palette {
            background: "#ECE9D8",
            surface: "#FFFFFF",
            text: "#000000",
            accent: "#0054E3",
            fonts: "\"Segoe UI\", Tahoma, Arial, sans-serif",
            bevel: "border: 1px solid #003C74",
            radius: "4px",
        },
    }
}

/// Deterministic generator driven by per-era palettes
#[derive(Debug, Clone, Default)]
pub struct TemplateStyleGenerator;

impl TemplateStyleGenerator {
    pub fn new() -> Self {
        Self
    }

    fn render(&self, request: &GenerationRequest) -> String {
        let p = palette(request.era);
        let preset = request.feedback.as_ref().and_then(|f| f.preset_type);

        let radius = match preset {
            Some(FeedbackPreset::TooModern) => "0",
            _ => p.radius,
        };
        let container_padding = match preset {
            Some(FeedbackPreset::SimplifyLayout) => "0",
            _ => "8px",
        };

        let mut lines = vec![
            format!("/* {} style for {} */", request.era, request.domain),
            format!("* {{ font-family: {}; }}", p.fonts),
            format!(
                "body {{ background-color: {}; color: {}; margin: 0; padding: 8px; }}",
                p.background, p.text
            ),
            format!(
                "main, article, section {{ background-color: {}; padding: {}; border-radius: {}; }}",
                p.surface, container_padding, radius
            ),
            format!("h1, h2, h3 {{ color: {}; font-weight: bold; }}", p.accent),
            format!("a {{ color: {}; text-decoration: underline; }}", p.accent),
            format!(
                "button, input[type=\"submit\"], input[type=\"button\"] {{ background: {}; color: {}; padding: 4px 8px; border-radius: {}; {}; }}",
                p.surface, p.text, radius, p.bevel
            ),
            format!(
                "input, textarea {{ background: #FFFFFF; color: {}; padding: 4px; }}",
                p.text
            ),
        ];

        match preset {
            Some(FeedbackPreset::TooSimple) => {
                lines.push(format!(
                    "nav, header, footer {{ {}; background: {}; }}",
                    p.bevel, p.surface
                ));
                lines.push(format!("hr {{ border: 0; border-top: 2px groove {}; }}", p.background));
            }
            Some(FeedbackPreset::MakeUsable) => {
                lines.push("body { font-size: 16px; line-height: 1.5; }".to_string());
                lines.push("a:focus, button:focus { outline: 2px dotted #000000; }".to_string());
            }
            _ => {}
        }

        lines.push(String::new());
        lines.join("\n")
    }
}

#[async_trait]
impl StyleGenerator for TemplateStyleGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<String, GeneratorError> {
        let css = self.render(&request);
        debug!(
            "Template generator produced {} bytes for {}/{}",
            css.len(),
            request.domain,
            request.era
        );
        Ok(css)
    }

    fn name(&self) -> &str {
        "template"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::sanitize::validate_css;
    use chrono::Utc;
    use retroweb_model::{Feedback, PageStructure};

    fn request(era: Era, preset: Option<FeedbackPreset>) -> GenerationRequest {
        GenerationRequest {
            domain: "example.com".to_string(),
            era,
            fingerprint: PageStructure::default().fingerprint().unwrap(),
            dom_summary: None,
            feedback: preset.map(|p| Feedback::new(Some(p), None, Utc::now()).unwrap()),
        }
    }

    #[tokio::test]
    async fn test_every_era_generates_valid_css() {
        let generator = TemplateStyleGenerator::new();
        for era in Era::ALL {
            let css = generator.generate(request(era, None)).await.unwrap();
            assert!(validate_css(&css).is_ok(), "{}", era);
        }
    }

    #[tokio::test]
    async fn test_too_modern_drops_rounding() {
        let generator = TemplateStyleGenerator::new();
        let css = generator
            .generate(request(Era::Winxp, Some(FeedbackPreset::TooModern)))
            .await
            .unwrap();
        assert!(!css.contains("border-radius: 4px"));
    }

    #[tokio::test]
    async fn test_output_is_deterministic() {
        let generator = TemplateStyleGenerator::new();
        let a = generator.generate(request(Era::Win98, None)).await.unwrap();
        let b = generator.generate(request(Era::Win98, None)).await.unwrap();
        assert_eq!(a, b);
    }
}
