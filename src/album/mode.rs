pub const VECTOR_LABEL_TOKEN: &str = "/svg";
pub const RASTER_TOKEN: &str = "/draw";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationMode {
    /// Print-ready SVG label.
    VectorLabel,
    /// Rendered marketing preview image.
    RasterVisualization,
}

impl GenerationMode {
    pub fn label(self) -> &'static str {
        match self {
            GenerationMode::VectorLabel => "vector",
            GenerationMode::RasterVisualization => "raster",
        }
    }

    pub fn status_text(self) -> &'static str {
        match self {
            GenerationMode::VectorLabel => "🏷 Designing the label...",
            GenerationMode::RasterVisualization => "🎨 Drawing...",
        }
    }
}

fn strip_token<'a>(text: &'a str, token: &str) -> Option<&'a str> {
    let head = text.get(..token.len())?;
    if head.eq_ignore_ascii_case(token) {
        Some(&text[token.len()..])
    } else {
        None
    }
}

/// Picks the generation mode from a caption and returns the prompt that is
/// left once the mode token is removed. A caption that starts with `/svg`
/// selects the vector label mode, anything else renders a raster image.
pub fn classify_caption(caption: Option<&str>, default_prompt: &str) -> (GenerationMode, String) {
    let text = caption.unwrap_or("").trim_start();

    let (mode, rest) = if let Some(rest) = strip_token(text, VECTOR_LABEL_TOKEN) {
        (GenerationMode::VectorLabel, rest)
    } else if let Some(rest) = strip_token(text, RASTER_TOKEN) {
        (GenerationMode::RasterVisualization, rest)
    } else {
        (GenerationMode::RasterVisualization, text)
    };

    let prompt = rest.trim();
    let prompt = if prompt.is_empty() {
        default_prompt.to_string()
    } else {
        prompt.to_string()
    };
    (mode, prompt)
}

/// True when a caption explicitly asks for generation rather than chat.
pub fn has_generation_prefix(caption: &str) -> bool {
    let text = caption.trim_start();
    strip_token(text, VECTOR_LABEL_TOKEN).is_some() || strip_token(text, RASTER_TOKEN).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFAULT: &str = "default prompt";

    #[test]
    fn svg_prefix_selects_vector_mode() {
        assert_eq!(
            classify_caption(Some("/svg shampoo bottle"), DEFAULT),
            (GenerationMode::VectorLabel, "shampoo bottle".to_string())
        );
        assert_eq!(
            classify_caption(Some("  /SVG   serum label  "), DEFAULT),
            (GenerationMode::VectorLabel, "serum label".to_string())
        );
    }

    #[test]
    fn caption_without_prefix_selects_raster_mode() {
        assert_eq!(
            classify_caption(Some("nice bottle design"), DEFAULT),
            (
                GenerationMode::RasterVisualization,
                "nice bottle design".to_string()
            )
        );
        assert_eq!(
            classify_caption(Some("/draw a poster"), DEFAULT),
            (GenerationMode::RasterVisualization, "a poster".to_string())
        );
    }

    #[test]
    fn token_elsewhere_in_the_caption_is_ignored() {
        assert_eq!(
            classify_caption(Some("make it /svg please"), DEFAULT),
            (
                GenerationMode::RasterVisualization,
                "make it /svg please".to_string()
            )
        );
    }

    #[test]
    fn empty_prompt_falls_back_to_default() {
        assert_eq!(
            classify_caption(Some("/svg   "), DEFAULT),
            (GenerationMode::VectorLabel, DEFAULT.to_string())
        );
        assert_eq!(
            classify_caption(None, DEFAULT),
            (GenerationMode::RasterVisualization, DEFAULT.to_string())
        );
    }

    #[test]
    fn short_or_multibyte_captions_do_not_panic() {
        assert!(!has_generation_prefix("/s"));
        assert!(!has_generation_prefix("фото"));
        assert!(has_generation_prefix(" /draw cat"));
        assert_eq!(
            classify_caption(Some("привет"), DEFAULT).1,
            "привет".to_string()
        );
    }
}
