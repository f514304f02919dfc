use std::collections::HashSet;

use ego_tree::NodeId;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::markdown::{image_source, resolve};

/// Tags that never carry article content.
pub const SCRIPT_TAGS: &[&str] = &["script", "style"];

/// Re-parse an element's subtree as an owned fragment that can be mutated.
pub fn fragment_of(element: ElementRef<'_>) -> Html {
    Html::parse_fragment(&element.html())
}

/// Detach every element matching any of `selectors`. Invalid selectors are skipped.
pub fn remove_selectors(doc: &mut Html, selectors: &[&str]) -> usize {
    let ids: Vec<NodeId> = selectors
        .iter()
        .filter_map(|raw| Selector::parse(raw).ok())
        .flat_map(|sel| doc.select(&sel).map(|el| el.id()).collect::<Vec<_>>())
        .collect();
    detach_all(doc, ids)
}

/// Detach every element for which `predicate` holds.
pub fn remove_where(doc: &mut Html, predicate: impl Fn(&ElementRef<'_>) -> bool) -> usize {
    let ids: Vec<NodeId> = doc
        .root_element()
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter(|el| predicate(el))
        .map(|el| el.id())
        .collect();
    detach_all(doc, ids)
}

/// Drop later `<img>` elements whose resolved source repeats an earlier one.
pub fn dedupe_images(doc: &mut Html, base_url: Option<&str>) -> usize {
    let base = base_url.and_then(|b| Url::parse(b).ok());
    let Ok(img) = Selector::parse("img") else {
        return 0;
    };
    let mut seen = HashSet::new();
    let ids: Vec<NodeId> = doc
        .select(&img)
        .filter_map(|el| {
            let src = image_source(&el)?;
            let key = resolve(&src, base.as_ref()).unwrap_or(src);
            (!seen.insert(key)).then(|| el.id())
        })
        .collect();
    detach_all(doc, ids)
}

/// Remove the closest `ancestor_tag` of every link whose href contains one of `needles`.
pub fn remove_link_containers(doc: &mut Html, needles: &[&str], ancestor_tag: &str) -> usize {
    let Ok(links) = Selector::parse("a[href]") else {
        return 0;
    };
    let ids: Vec<NodeId> = doc
        .select(&links)
        .filter(|a| {
            a.value()
                .attr("href")
                .is_some_and(|href| needles.iter().any(|needle| href.contains(needle)))
        })
        .map(|a| {
            a.ancestors()
                .filter_map(ElementRef::wrap)
                .find(|parent| parent.value().name() == ancestor_tag)
                .map_or(a.id(), |parent| parent.id())
        })
        .collect();
    detach_all(doc, ids)
}

/// True when the element carries every class in `classes`.
pub fn has_classes(el: &ElementRef<'_>, classes: &[&str]) -> bool {
    classes
        .iter()
        .all(|class| el.value().classes().any(|c| c == *class))
}

fn detach_all(doc: &mut Html, ids: Vec<NodeId>) -> usize {
    let mut removed = 0;
    for id in ids {
        if let Some(mut node) = doc.tree.get_mut(id) {
            node.detach();
            removed += 1;
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count(doc: &Html, css: &str) -> usize {
        let sel = Selector::parse(css).unwrap();
        doc.select(&sel).count()
    }

    #[test]
    fn removes_by_selector_and_predicate() {
        let mut doc = Html::parse_fragment(
            r#"<div><script>x()</script><p class="ad banner">buy</p><p class="ad">keep</p><p>text</p></div>"#,
        );
        assert_eq!(remove_selectors(&mut doc, &["script", "not a [selector"]), 1);
        assert_eq!(remove_where(&mut doc, |el| has_classes(el, &["ad", "banner"])), 1);
        assert_eq!(count(&doc, "script"), 0);
        assert_eq!(count(&doc, "p"), 2);
    }

    #[test]
    fn duplicate_images_collapse_to_first() {
        let mut doc = Html::parse_fragment(
            r#"<p><img src="/a.png"><img data-src="https://x.test/a.png" src="data:image/gif;base64,R0"><img src="/b.png"></p>"#,
        );
        assert_eq!(dedupe_images(&mut doc, Some("https://x.test/post")), 1);
        assert_eq!(count(&doc, "img"), 2);
    }

    #[test]
    fn promo_paragraphs_are_removed() {
        let mut doc = Html::parse_fragment(
            r#"<p>Get the <a href="https://sspai.com/page/client">app</a></p><p>body</p>"#,
        );
        assert_eq!(remove_link_containers(&mut doc, &["sspai.com/page/client"], "p"), 1);
        assert_eq!(count(&doc, "p"), 1);
    }
}
