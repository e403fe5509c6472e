use std::{cell::RefCell, collections::HashMap, rc::Rc};

use html_escape::decode_html_entities;
use lol_html::{RewriteStrSettings, element, rewrite_str, text};
use tracing::warn;
use url::Url;

use crate::domain::MetadataRecord;

const TITLE_KEYS: &[&str] = &["og:title", "twitter:title"];
const SITE_KEYS: &[&str] = &["og:site_name", "application-name"];
const DESCRIPTION_KEYS: &[&str] = &["og:description", "twitter:description", "description"];
const IMAGE_KEYS: &[&str] = &[
    "og:image:secure_url",
    "og:image",
    "og:image:url",
    "twitter:image",
    "twitter:image:src",
];
const VIDEO_KEYS: &[&str] = &[
    "og:video:secure_url",
    "og:video",
    "og:video:url",
    "twitter:player",
];

/// Turns a rendered document into a [`MetadataRecord`].
pub trait MetadataNormalizer: Send + Sync {
    fn normalize(&self, page_url: &Url, markup: &str) -> MetadataRecord;
}

/// Reads Open Graph, Twitter card and plain HTML metadata.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenGraphNormalizer;

#[derive(Default)]
struct ScrapeState {
    meta: HashMap<String, String>,
    title: String,
    title_done: bool,
    icon: Option<String>,
    touch_icon: Option<String>,
}

impl MetadataNormalizer for OpenGraphNormalizer {
    fn normalize(&self, page_url: &Url, markup: &str) -> MetadataRecord {
        let state = Rc::new(RefCell::new(ScrapeState::default()));

        let result = rewrite_str(
            markup,
            RewriteStrSettings {
                element_content_handlers: vec![
                    element!("meta[content]", {
                        let state = Rc::clone(&state);
                        move |el| {
                            let key = el
                                .get_attribute("property")
                                .or_else(|| el.get_attribute("name"))
                                .map(|key| key.trim().to_ascii_lowercase());
                            let content = el.get_attribute("content");
                            if let (Some(key), Some(content)) = (key, content) {
                                let content = decode_html_entities(content.trim());
                                let content = content.trim();
                                if !key.is_empty() && !content.is_empty() {
                                    state
                                        .borrow_mut()
                                        .meta
                                        .entry(key)
                                        .or_insert_with(|| content.to_string());
                                }
                            }
                            Ok(())
                        }
                    }),
                    element!("link[rel][href]", {
                        let state = Rc::clone(&state);
                        move |el| {
                            let rel = el.get_attribute("rel").unwrap_or_default();
                            let href = el.get_attribute("href").unwrap_or_default();
                            let href = decode_html_entities(href.trim());
                            let href = href.trim();
                            if href.is_empty() {
                                return Ok(());
                            }
                            let mut state = state.borrow_mut();
                            for token in rel.split_ascii_whitespace() {
                                match token.to_ascii_lowercase().as_str() {
                                    "icon" if state.icon.is_none() => {
                                        state.icon = Some(href.to_string());
                                    }
                                    "apple-touch-icon" if state.touch_icon.is_none() => {
                                        state.touch_icon = Some(href.to_string());
                                    }
                                    _ => {}
                                }
                            }
                            Ok(())
                        }
                    }),
                    text!("title", {
                        let state = Rc::clone(&state);
                        move |chunk| {
                            let mut state = state.borrow_mut();
                            if !state.title_done {
                                state.title.push_str(chunk.as_str());
                                if chunk.last_in_text_node() {
                                    state.title_done = true;
                                }
                            }
                            Ok(())
                        }
                    }),
                ],
                ..RewriteStrSettings::default()
            },
        );

        if let Err(err) = result {
            warn!(
                target = "application::render::normalize",
                op = "normalize",
                result = "partial",
                url = %page_url,
                error = %err,
                "Document scraping stopped early; using fields collected so far"
            );
        }

        let state = Rc::try_unwrap(state)
            .map(RefCell::into_inner)
            .unwrap_or_else(|rc| std::mem::take(&mut *rc.borrow_mut()));

        build_record(page_url, state)
    }
}

fn build_record(page_url: &Url, state: ScrapeState) -> MetadataRecord {
    let ScrapeState {
        meta,
        title,
        icon,
        touch_icon,
        ..
    } = state;

    let first = |keys: &[&str]| keys.iter().find_map(|key| meta.get(*key).cloned());

    let plain_title = collapse_whitespace(&decode_html_entities(&title));
    let title = first(TITLE_KEYS).or_else(|| (!plain_title.is_empty()).then_some(plain_title));

    let icon = icon
        .or(touch_icon)
        .and_then(|href| resolve(page_url, &href))
        .or_else(|| default_favicon(page_url));

    MetadataRecord {
        title,
        site: first(SITE_KEYS),
        description: first(DESCRIPTION_KEYS),
        icon,
        image: first(IMAGE_KEYS).and_then(|href| resolve(page_url, &href)),
        video: first(VIDEO_KEYS).and_then(|href| resolve(page_url, &href)),
    }
}

fn resolve(base: &Url, href: &str) -> Option<String> {
    base.join(href).ok().map(|url| url.to_string())
}

fn default_favicon(page_url: &Url) -> Option<String> {
    matches!(page_url.scheme(), "http" | "https")
        .then(|| resolve(page_url, "/favicon.ico"))
        .flatten()
}

fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}
