//! Tokenized render view for a single page.
//!
//! The headless browser loads this view. It checks the token before touching
//! any content, scales every item to the output resolution, shifts it by the
//! bleed offset and emits an HTML document whose `<body>` is marked ready
//! once every image has either loaded or failed.

use chrono::{DateTime, Utc};
use percent_encoding::percent_decode_str;
use reqwest::Url;
use std::fmt::Write as _;
use std::sync::Arc;

use crate::geometry::{BookSize, EDITOR_DPI};
use crate::page::{ItemKind, Page};

use super::source::{PageSource, SourceError};
use super::token::{RenderSubject, RenderTokenIssuer, TokenError};

/// Selector the snapshotter waits for before capturing.
pub const READY_SELECTOR: &str = "body[data-render-ready=\"true\"]";

const DEFAULT_PAGE_COLOR: &str = "#ffffff";
const DEFAULT_TEXT_COLOR: &str = "#222222";
const DEFAULT_SHAPE_COLOR: &str = "#cccccc";
const DEFAULT_FONT_SIZE: f64 = 16.0;

#[derive(Debug, thiserror::Error)]
pub enum ViewError {
    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("Page '{0}' not found")]
    NotFound(String),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("Bad render request: {0}")]
    BadRequest(String),
}

impl ViewError {
    /// HTTP status the view answers with.
    pub fn status_code(&self) -> u16 {
        match self {
            ViewError::Token(_) => 401,
            ViewError::NotFound(_) => 404,
            ViewError::BadRequest(_) => 400,
            ViewError::Source(_) => 503,
        }
    }
}

/// Parameters carried by a page render URL.
#[derive(Debug, Clone, PartialEq)]
pub struct PageViewParams {
    pub family_id: String,
    pub page_id: String,
    pub book_size: BookSize,
    pub token: Option<String>,
    /// Multiplier from editor units to output pixels.
    pub scale: f64,
    /// Offset added to every item so the trim box sits inside the bleed.
    pub bleed_px: f64,
}

impl PageViewParams {
    /// `{base}/render/{family}/{page}?size=..&token=..&scale=..&bleed=..`
    pub fn to_url(&self, base_url: &str) -> Result<String, ViewError> {
        let mut url = Url::parse(base_url)
            .map_err(|e| ViewError::BadRequest(format!("invalid base URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| ViewError::BadRequest("base URL cannot carry a path".to_string()))?
            .pop_if_empty()
            .extend(["render", self.family_id.as_str(), self.page_id.as_str()]);
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("size", self.book_size.as_str());
            if let Some(token) = &self.token {
                query.append_pair("token", token);
            }
            query.append_pair("scale", &self.scale.to_string());
            query.append_pair("bleed", &self.bleed_px.to_string());
        }
        Ok(url.into())
    }

    pub fn from_url(raw: &str) -> Result<Self, ViewError> {
        let url = Url::parse(raw).map_err(|e| ViewError::BadRequest(e.to_string()))?;
        let segments: Vec<String> = url
            .path_segments()
            .map(|s| {
                s.map(|segment| percent_decode_str(segment).decode_utf8_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        let [.., render, family_id, page_id] = segments.as_slice() else {
            return Err(ViewError::BadRequest("expected /render/{family}/{page}".to_string()));
        };
        if render != "render" {
            return Err(ViewError::BadRequest("expected /render/{family}/{page}".to_string()));
        }

        let mut params = Self {
            family_id: family_id.clone(),
            page_id: page_id.clone(),
            book_size: BookSize::SmallSquare,
            token: None,
            scale: 1.0,
            bleed_px: 0.0,
        };
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "size" => {
                    params.book_size = BookSize::parse(&value)
                        .ok_or_else(|| ViewError::BadRequest(format!("unknown size '{}'", value)))?
                }
                "token" => params.token = Some(value.into_owned()),
                "scale" => params.scale = parse_number("scale", &value)?,
                "bleed" => params.bleed_px = parse_number("bleed", &value)?,
                _ => {}
            }
        }
        Ok(params)
    }
}

fn parse_number(name: &str, value: &str) -> Result<f64, ViewError> {
    value
        .parse::<f64>()
        .map_err(|_| ViewError::BadRequest(format!("{} is not a number", name)))
}

/// An item positioned in output pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct ScaledItem {
    pub id: String,
    pub kind: ItemKind,
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
    pub rotation: f64,
    pub src: Option<String>,
    pub text: Option<String>,
    pub font_size: f64,
    pub color: Option<String>,
}

/// A page ready to be laid out at output resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ScaledPage {
    pub width_px: f64,
    pub height_px: f64,
    pub background_color: String,
    pub items: Vec<ScaledItem>,
}

/// Scales `page` for output and offsets it by the bleed.
pub fn scale_page(page: &Page, book_size: BookSize, scale: f64, bleed_px: f64) -> ScaledPage {
    let (trim_w, trim_h) = book_size.trim_inches();
    let items = page
        .items
        .iter()
        .filter_map(|item| {
            let (x, y, w, h) = item.placement()?;
            Some(ScaledItem {
                id: item.id.clone(),
                kind: item.kind,
                left: x * scale + bleed_px,
                top: y * scale + bleed_px,
                width: w * scale,
                height: h * scale,
                rotation: item.rotation,
                src: item.src.clone(),
                text: item.text.clone(),
                font_size: item.font_size.unwrap_or(DEFAULT_FONT_SIZE) * scale,
                color: item.color.clone(),
            })
        })
        .collect();

    ScaledPage {
        width_px: trim_w * EDITOR_DPI * scale + 2.0 * bleed_px,
        height_px: trim_h * EDITOR_DPI * scale + 2.0 * bleed_px,
        background_color: safe_color(page.background_color.as_deref(), DEFAULT_PAGE_COLOR),
        items,
    }
}

/// Rendered view document with its pixel size.
#[derive(Debug, Clone)]
pub struct RenderedView {
    pub html: String,
    pub width_px: u32,
    pub height_px: u32,
}

/// Server side of the render URLs.
pub struct RenderView {
    issuer: Arc<RenderTokenIssuer>,
    pages: Arc<dyn PageSource>,
}

impl RenderView {
    pub fn new(issuer: Arc<RenderTokenIssuer>, pages: Arc<dyn PageSource>) -> Self {
        Self { issuer, pages }
    }

    pub fn issuer(&self) -> &RenderTokenIssuer {
        &self.issuer
    }

    pub async fn render_page(
        &self,
        params: &PageViewParams,
        now: DateTime<Utc>,
    ) -> Result<RenderedView, ViewError> {
        self.issuer.verify(
            params.token.as_deref(),
            &params.family_id,
            &RenderSubject::page(params.page_id.clone()),
            now,
        )?;

        if !(params.scale.is_finite() && params.scale > 0.0) {
            return Err(ViewError::BadRequest("scale must be positive".to_string()));
        }
        if !(params.bleed_px.is_finite() && params.bleed_px >= 0.0) {
            return Err(ViewError::BadRequest("bleed must be non-negative".to_string()));
        }

        let page = self
            .pages
            .load_page(&params.family_id, &params.page_id)
            .await?
            .ok_or_else(|| ViewError::NotFound(params.page_id.clone()))?;

        let scaled = scale_page(&page, params.book_size, params.scale, params.bleed_px);
        Ok(RenderedView {
            width_px: scaled.width_px.round() as u32,
            height_px: scaled.height_px.round() as u32,
            html: page_document(&scaled),
        })
    }
}

/// Builds the HTML document for a scaled page.
pub fn page_document(page: &ScaledPage) -> String {
    let mut body = String::new();
    for item in &page.items {
        let _ = write!(
            body,
            "<div class=\"item item-{kind}\" data-item-id=\"{id}\" style=\"left:{l:.3}px;top:{t:.3}px;width:{w:.3}px;height:{h:.3}px;transform:rotate({r}deg);{extra}\">{content}</div>",
            kind = kind_class(item.kind),
            id = html_escape(&item.id),
            l = item.left,
            t = item.top,
            w = item.width,
            h = item.height,
            r = item.rotation,
            extra = item_style(item),
            content = item_content(item),
        );
    }

    document(
        page.width_px,
        page.height_px,
        &page.background_color,
        &body,
    )
}

/// Wraps positioned content in the shared document shell with the readiness script.
pub(crate) fn document(width: f64, height: f64, background: &str, body: &str) -> String {
    format!(
        concat!(
            "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><style>",
            "html,body{{margin:0;padding:0;overflow:hidden;}}",
            "#canvas{{position:relative;width:{w:.3}px;height:{h:.3}px;background:{bg};overflow:hidden;}}",
            ".item{{position:absolute;box-sizing:border-box;overflow:hidden;}}",
            ".item img{{width:100%;height:100%;object-fit:cover;display:block;}}",
            "</style></head><body><div id=\"canvas\">{body}</div>{script}</body></html>"
        ),
        w = width,
        h = height,
        bg = background,
        body = body,
        script = READY_SCRIPT,
    )
}

/// Marks `<body>` ready once every image has loaded. Failed images count as loaded.
const READY_SCRIPT: &str = concat!(
    "<script>(function(){",
    "var imgs=Array.prototype.slice.call(document.images);",
    "var pending=imgs.length;",
    "function ready(){document.body.setAttribute('data-render-ready','true');}",
    "function settle(){pending-=1;if(pending<=0){ready();}}",
    "if(pending===0){ready();return;}",
    "imgs.forEach(function(img){",
    "if(img.complete){settle();}",
    "else{img.addEventListener('load',settle);img.addEventListener('error',settle);}",
    "});",
    "})();</script>"
);

fn kind_class(kind: ItemKind) -> &'static str {
    match kind {
        ItemKind::Photo => "photo",
        ItemKind::Text => "text",
        ItemKind::Sticker => "sticker",
        ItemKind::Shape => "shape",
        ItemKind::Background => "background",
    }
}

fn item_style(item: &ScaledItem) -> String {
    match item.kind {
        ItemKind::Text => format!(
            "font-size:{:.3}px;color:{};white-space:pre-wrap;",
            item.font_size,
            safe_color(item.color.as_deref(), DEFAULT_TEXT_COLOR)
        ),
        ItemKind::Shape => format!(
            "background:{};",
            safe_color(item.color.as_deref(), DEFAULT_SHAPE_COLOR)
        ),
        ItemKind::Background if item.src.is_none() => format!(
            "background:{};",
            safe_color(item.color.as_deref(), DEFAULT_PAGE_COLOR)
        ),
        _ => String::new(),
    }
}

fn item_content(item: &ScaledItem) -> String {
    match (item.kind, &item.src, &item.text) {
        (ItemKind::Text, _, Some(text)) => html_escape(text),
        (ItemKind::Photo | ItemKind::Sticker | ItemKind::Background, Some(src), _) => {
            format!("<img src=\"{}\" alt=\"\">", html_escape(src))
        }
        _ => String::new(),
    }
}

/// Accepts `#rgb`, `#rrggbb` and `#rrggbbaa`; anything else falls back.
pub(crate) fn safe_color(color: Option<&str>, fallback: &str) -> String {
    match color {
        Some(c)
            if c.starts_with('#')
                && matches!(c.len(), 4 | 7 | 9)
                && c[1..].chars().all(|ch| ch.is_ascii_hexdigit()) =>
        {
            c.to_string()
        }
        _ => fallback.to_string(),
    }
}

pub(crate) fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::ContentItem;
    use crate::render::source::InMemoryPageSource;
    use chrono::Duration;

    fn sample_page() -> Page {
        Page {
            id: "p1".to_string(),
            background_color: Some("#fafafa".to_string()),
            items: vec![
                ContentItem {
                    id: "photo".to_string(),
                    x: Some(10.0),
                    y: Some(20.0),
                    width: Some(100.0),
                    height: Some(50.0),
                    src: Some("https://img/a.jpg".to_string()),
                    ..Default::default()
                },
                ContentItem {
                    id: "caption".to_string(),
                    kind: ItemKind::Text,
                    x: Some(0.0),
                    y: Some(0.0),
                    width: Some(200.0),
                    height: Some(20.0),
                    text: Some("<b>Summer</b>".to_string()),
                    ..Default::default()
                },
            ],
            ..Default::default()
        }
    }

    async fn view() -> RenderView {
        let source = InMemoryPageSource::new();
        source.insert("fam", sample_page()).await;
        RenderView::new(
            Arc::new(RenderTokenIssuer::new(&[9u8; 32]).unwrap()),
            Arc::new(source),
        )
    }

    fn params(token: Option<String>) -> PageViewParams {
        PageViewParams {
            family_id: "fam".to_string(),
            page_id: "p1".to_string(),
            book_size: BookSize::SmallSquare,
            token,
            scale: 2.0,
            bleed_px: 10.0,
        }
    }

    #[test]
    fn test_scale_page_applies_scale_and_bleed() {
        let scaled = scale_page(&sample_page(), BookSize::SmallSquare, 2.0, 10.0);
        assert_eq!(scaled.width_px, 8.0 * 96.0 * 2.0 + 20.0);
        let photo = &scaled.items[0];
        assert_eq!((photo.left, photo.top), (30.0, 50.0));
        assert_eq!((photo.width, photo.height), (200.0, 100.0));
    }

    #[test]
    fn test_document_escapes_text_and_has_ready_script() {
        let html = page_document(&scale_page(&sample_page(), BookSize::SmallSquare, 1.0, 0.0));
        assert!(html.contains("&lt;b&gt;Summer&lt;/b&gt;"));
        assert!(html.contains("data-render-ready"));
        assert!(html.contains("img.addEventListener('error',settle)"));
    }

    #[test]
    fn test_unsafe_color_falls_back() {
        assert_eq!(safe_color(Some("red;}</style>"), "#ffffff"), "#ffffff");
        assert_eq!(safe_color(Some("#A1b2C3"), "#ffffff"), "#A1b2C3");
    }

    #[test]
    fn test_url_round_trip() {
        let original = params(Some("tok-en_1".to_string()));
        let url = original.to_url("http://render.local/app/").unwrap();
        assert!(url.starts_with("http://render.local/app/render/fam/p1?"));
        assert_eq!(PageViewParams::from_url(&url).unwrap(), original);
    }

    #[test]
    fn test_url_decodes_escaped_ids() {
        let original = PageViewParams {
            family_id: "fam/a b".to_string(),
            page_id: "page-é".to_string(),
            ..params(None)
        };
        let url = original.to_url("http://render.local").unwrap();
        assert!(url.contains("/render/fam%2Fa%20b/page-%C3%A9?"), "{}", url);
        assert_eq!(PageViewParams::from_url(&url).unwrap(), original);

        let raw = PageViewParams::from_url("http://render.local/render/fam/p%41?size=portrait");
        assert_eq!(raw.unwrap().page_id, "pA");
    }

    #[tokio::test]
    async fn test_missing_token_rejected_before_loading() {
        let view = view().await;
        let err = view.render_page(&params(None), Utc::now()).await.unwrap_err();
        assert!(matches!(err, ViewError::Token(TokenError::Missing)));
        assert_eq!(err.status_code(), 401);
    }

    #[tokio::test]
    async fn test_valid_token_renders_page() {
        let view = view().await;
        let now = Utc::now();
        let token = view
            .issuer()
            .issue("fam", RenderSubject::page("p1"), Duration::minutes(1), now)
            .unwrap();
        let rendered = view.render_page(&params(Some(token)), now).await.unwrap();
        assert_eq!(rendered.width_px, 1556);
        assert!(rendered.html.contains("data-item-id=\"photo\""));
    }

    #[tokio::test]
    async fn test_unknown_page_is_not_found() {
        let view = view().await;
        let now = Utc::now();
        let token = view
            .issuer()
            .issue("fam", RenderSubject::page("nope"), Duration::minutes(1), now)
            .unwrap();
        let mut request = params(Some(token));
        request.page_id = "nope".to_string();
        let err = view.render_page(&request, now).await.unwrap_err();
        assert_eq!(err.status_code(), 404);
    }
}
