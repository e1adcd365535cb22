use std::{fs, path::Path};

use anyhow::{Context, Result};

const MATHPIX_BUNDLE: &str = "https://cdn.jsdelivr.net/npm/mathpix-markdown-it@1.3.6/es5/bundle.js";

/// Delimiter pairs rewritten to plain brackets when `\left`/`\right` counts differ.
const DELIMITERS: [(&str, &str); 10] = [
    ("\\left(", "("),
    ("\\right)", ")"),
    ("\\left[", "["),
    ("\\right]", "]"),
    ("\\left{", "{"),
    ("\\right}", "}"),
    ("\\left|", "|"),
    ("\\right|", "|"),
    ("\\left.", "."),
    ("\\right.", "."),
];

/// Whether structured output of this shape can be rendered as markdown.
/// Humdrum `**kern` scores are left as text.
pub fn is_renderable(text: &str) -> bool {
    !text.contains("**kern")
}

/// Standalone HTML page that renders `text` (markdown with LaTeX) in the
/// browser.
pub fn render_html(text: &str) -> Result<String> {
    let normalized = balance_delimiters(text).replace('$', "");
    let literal = serde_json::to_string(&normalized)
        .context("failed to encode render text")?
        .replace("</", "<\\/");
    Ok(format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8">
  <meta name="viewport" content="width=device-width, initial-scale=1.0">
  <title>GOT-OCR</title>
  <style>
    body {{ margin: 0; background: #f5f5f5; font-family: sans-serif; }}
    #content {{ max-width: 960px; margin: 2rem auto; padding: 2rem; background: #fff; }}
  </style>
  <script>
    const text = {literal};
  </script>
  <script>
    const script = document.createElement("script");
    script.src = "{MATHPIX_BUNDLE}";
    script.onload = function () {{
      window.loadMathJax();
      const el = document.getElementById("content-text");
      if (el) {{
        el.outerHTML = window.render(text, {{ htmlTags: true }});
      }}
    }};
    document.head.append(script);
  </script>
</head>
<body>
  <div id="content"><div id="content-text"></div></div>
</body>
</html>
"#
    ))
}

/// Writes the rendered page to `path`. Returns `false` when the text is not
/// renderable and nothing was written.
pub fn write_html(path: &Path, text: &str) -> Result<bool> {
    if !is_renderable(text) {
        return Ok(false);
    }
    let html = render_html(text)?;
    fs::write(path, html)
        .with_context(|| format!("failed to write render output {}", path.display()))?;
    Ok(true)
}

fn balance_delimiters(text: &str) -> String {
    let left = text.matches("\\left").count();
    let right = text.matches("\\right").count();
    if left == right {
        return text.to_string();
    }
    DELIMITERS
        .iter()
        .fold(text.to_string(), |acc, (from, to)| acc.replace(from, to))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embeds_text_as_js_literal() {
        let html = render_html("# Title\nSay \"hi\" </script>").unwrap();
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains(r##"const text = "# Title\nSay \"hi\" <\/script>";"##));
        assert!(html.contains(MATHPIX_BUNDLE));
    }

    #[test]
    fn strips_dollars_and_unbalanced_delimiters() {
        let html = render_html("$x$ \\left( a \\right) \\left[ b").unwrap();
        assert!(html.contains(r#"const text = "x ( a ) [ b";"#));

        let balanced = balance_delimiters("\\left( a \\right)");
        assert_eq!(balanced, "\\left( a \\right)");
    }

    #[test]
    fn kern_scores_are_not_rendered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.html");
        assert!(!write_html(&path, "**kern\n4c").unwrap());
        assert!(!path.exists());
        assert!(write_html(&path, "plain").unwrap());
        assert!(fs::read_to_string(&path).unwrap().contains("\"plain\""));
    }
}
