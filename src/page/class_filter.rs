//! Search-panel sidebar of the student kanban: expansion, class items and
//! per-class verification of the rendered cards.

use std::collections::HashMap;

use serde::Serialize;
use tokio::time::Duration;

use super::{ErpPage, PageError, WaitState, xpath_literal};
use crate::browser::{ElementRef, PageDriver};
use crate::dom_scripts::EXPAND_SEARCH_PANEL_SCRIPT;

pub const SIDEBAR_ITEM: &str = "//div[contains(@class,'o_search_panel_label d-flex')]";
/// Tried in order when [`SIDEBAR_ITEM`] matches nothing.
pub const SIDEBAR_FALLBACKS: &[&str] = &[
    "//div[contains(@class,'o_search_panel_label')]",
    "//div[contains(@class,'search_panel_label')]",
    "//*[contains(@class,'panel_label')]",
];
pub const ITEM_TITLE: &str = "//span[contains(@class,'o_search_panel_label_title text-truncate')]";
pub const ITEM_TITLE_FALLBACK: &str = "span";

pub const KANBAN_VIEW: &str = "//div[contains(@class,'o_kanban_view')]";
pub const STUDENT_CARDS: &str =
    "(//div[contains(@class,'oe_kanban_global_click o_kanban_record_has_image_fill')])";
pub const NO_STUDENTS_MESSAGE: &str = "//div[@class='o_nocontent_help']//p[1]";
pub const STUDENT_CLASS: &str =
    "(//i[contains(@class,'icon na-layer-group-2')]/following-sibling::span)";
pub const STUDENT_NAME: &str = "(//strong[@class='o_kanban_record_title text-truncate']//span)";
pub const STUDENT_ID: &str = "(//i[contains(@class,'icon na-input-numeric')]/following-sibling::span)";

const DEBUG_PROBES: &[&str] = &[
    "//div[contains(@class,'o_search_panel_label')]",
    "//div[contains(@class,'search_panel_label')]",
    "//div[contains(@class,'panel_label')]",
    "//div[contains(@class,'search_panel')]//div",
    "//aside//div",
    "[data-search-panel]",
    ".o_search_panel_label",
    ".search_panel_label",
    "//span[contains(text(),'(')]",
];

const SIDEBAR_HTML_SCRIPT: &str = r#"(() => {
  const sidebar = document.querySelector('[class*="search_panel"], [class*="sidebar"], aside');
  return sidebar ? sidebar.outerHTML.substring(0, 1000) : 'No sidebar found';
})()"#;

const EXPANSION_SETTLE: Duration = Duration::from_millis(1_500);
const ITEM_CLICK_SETTLE: Duration = Duration::from_millis(300);
const PAGE_SETTLE: Duration = Duration::from_millis(200);
const MAX_EXPANSION_CLICKS: usize = 200;

/// Class items carry a parenthesised suffix, e.g. `6ème A (2024-2025)`.
pub fn is_class_title(title: &str) -> bool {
    title.contains('(') && title.contains(')')
}

/// The `occurrence`-th node of `selector` whose title is `title`. Nodes are
/// addressed by title so that groups expanding above them do not shift them.
pub fn titled_item(selector: &str, title: &str, occurrence: usize) -> ElementRef {
    let title = title.split_whitespace().collect::<Vec<_>>().join(" ");
    ElementRef::nth(
        format!("({selector})[.//span[normalize-space()={}]]", xpath_literal(&title)),
        occurrence,
    )
}

/// One entry of the search panel. `element` is a [`titled_item`] reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidebarItem {
    pub element: ElementRef,
    pub title: String,
    pub is_class: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MismatchedStudent {
    /// 1-based position of the card on the page.
    pub index: usize,
    pub name: String,
    pub id: String,
    pub expected_class: String,
    pub actual_class: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClassVerification {
    pub total: usize,
    pub matching: usize,
    pub mismatched: Vec<MismatchedStudent>,
}

impl ClassVerification {
    pub fn is_success(&self) -> bool {
        self.mismatched.is_empty()
    }
}

pub struct ClassFilterPage<'p, D: PageDriver> {
    page: &'p ErpPage<D>,
}

impl<'p, D: PageDriver> ClassFilterPage<'p, D> {
    pub fn new(page: &'p ErpPage<D>) -> Self {
        Self { page }
    }

    pub async fn navigate_from_login(&self) -> Result<(), PageError> {
        self.page.open_apprenant_menu().await?;
        self.wait_for_page_loaded().await;
        Ok(())
    }

    pub async fn wait_for_page_loaded(&self) {
        let quick = Duration::from_millis(self.page.timeouts().quick_ms);
        if let Err(err) = self
            .page
            .wait_for_selector(KANBAN_VIEW, WaitState::Attached, quick)
            .await
        {
            log::debug!("kanban view not rendered yet: {err}");
        }
        self.page.settle(PAGE_SETTLE).await;
    }

    /// Selector of the sidebar nodes: the primary one, else the first
    /// fallback matching anything.
    async fn sidebar_selector(&self) -> Option<(&'static str, usize)> {
        for &selector in std::iter::once(&SIDEBAR_ITEM).chain(SIDEBAR_FALLBACKS) {
            match self.page.count(selector).await {
                Ok(0) => log::debug!("no sidebar nodes for {selector}"),
                Ok(count) => return Some((selector, count)),
                Err(err) => log::debug!("counting {selector}: {err}"),
            }
        }
        None
    }

    /// Click every sidebar node once so collapsed groups reveal their
    /// classes. The sidebar is re-read after each click since expanding a
    /// group inserts its children into the same node list.
    pub async fn expand_all_sidebar_items(&self) -> bool {
        let mut expanded: HashMap<String, usize> = HashMap::new();
        let mut attempts = 0;
        let mut clicked = 0;
        let mut settled = false;

        while attempts < MAX_EXPANSION_CLICKS {
            let Some(items) = self.scan_items().await else {
                if attempts == 0 {
                    log::warn!("no sidebar nodes found to expand");
                }
                break;
            };
            let next = items.into_iter().find(|item| {
                item.element.index >= expanded.get(&item.title).copied().unwrap_or(0)
            });
            let Some(item) = next else {
                if settled {
                    break;
                }
                self.page.settle(EXPANSION_SETTLE).await;
                settled = true;
                continue;
            };

            settled = false;
            attempts += 1;
            *expanded.entry(item.title.clone()).or_default() += 1;
            match self.page.driver().click(&item.element).await {
                Ok(()) => {
                    clicked += 1;
                    self.page.settle(ITEM_CLICK_SETTLE).await;
                }
                Err(err) => log::debug!("skipping '{}': {err}", item.title),
            }
        }
        log::info!("clicked {clicked} of {attempts} sidebar nodes");
        clicked > 0
    }

    /// Click the search panel fold toggles from page script. Returns how many
    /// toggles were clicked.
    pub async fn expand_with_script(&self) -> usize {
        let clicked = match self.page.driver().evaluate(EXPAND_SEARCH_PANEL_SCRIPT).await {
            Ok(value) => value.as_u64().unwrap_or(0) as usize,
            Err(err) => {
                log::warn!("script expansion failed: {err}");
                0
            }
        };
        self.page.settle(EXPANSION_SETTLE).await;
        clicked
    }

    pub async fn get_all_sidebar_items(&self) -> Vec<SidebarItem> {
        let items = self.scan_items().await.unwrap_or_default();
        log::info!(
            "{} sidebar items, {} classes",
            items.len(),
            items.iter().filter(|item| item.is_class).count()
        );
        items
    }

    /// Read the titled sidebar nodes in document order. `None` when no
    /// sidebar selector matches anything.
    async fn scan_items(&self) -> Option<Vec<SidebarItem>> {
        let (selector, count) = self.sidebar_selector().await?;

        let driver = self.page.driver();
        let mut occurrences: HashMap<String, usize> = HashMap::new();
        let mut items = Vec::with_capacity(count);
        for index in 0..count {
            let node = ElementRef::nth(selector, index);
            let title = match driver.text_within(&node, ITEM_TITLE).await {
                Ok(Some(title)) => Some(title),
                Ok(None) => driver
                    .text_within(&node, ITEM_TITLE_FALLBACK)
                    .await
                    .unwrap_or_else(|err| {
                        log::debug!("reading title of {node}: {err}");
                        None
                    }),
                Err(err) => {
                    log::debug!("reading title of {node}: {err}");
                    None
                }
            };
            let Some(title) = title.map(|t| t.trim().to_string()).filter(|t| !t.is_empty())
            else {
                continue;
            };
            let occurrence = occurrences.entry(title.clone()).or_default();
            let element = titled_item(selector, &title, *occurrence);
            *occurrence += 1;
            items.push(SidebarItem {
                is_class: is_class_title(&title),
                element,
                title,
            });
        }
        Some(items)
    }

    /// Expand the sidebar and list its items, falling back to script
    /// expansion when no class shows up.
    pub async fn discover_items(&self) -> Vec<SidebarItem> {
        self.expand_all_sidebar_items().await;
        self.wait_for_page_loaded().await;
        let items = self.get_all_sidebar_items().await;
        if items.iter().any(|item| item.is_class) {
            return items;
        }

        log::warn!("no class items after expansion, trying script expansion");
        let toggled = self.expand_with_script().await;
        log::info!("script expansion clicked {toggled} toggles");
        self.get_all_sidebar_items().await
    }

    /// Click `item`, found again by its title.
    pub async fn click_sidebar_item(&self, item: &SidebarItem) -> Result<(), PageError> {
        self.page.driver().click(&item.element).await?;
        self.page.settle(ITEM_CLICK_SETTLE).await;
        Ok(())
    }

    /// `false` when the "no content" placeholder shows, otherwise whether
    /// any card renders.
    pub async fn has_students(&self) -> bool {
        let driver = self.page.driver();
        if driver
            .is_visible(&ElementRef::first(NO_STUDENTS_MESSAGE))
            .await
            .unwrap_or(false)
        {
            return false;
        }
        self.page.count(STUDENT_CARDS).await.unwrap_or(0) > 0
    }

    /// Compare each card's class label against `class_name`, collecting every
    /// mismatch.
    pub async fn verify_students_match_class(&self, class_name: &str) -> Result<ClassVerification, PageError> {
        let driver = self.page.driver();
        let total = self.page.count(STUDENT_CARDS).await?;
        let mut verification = ClassVerification {
            total,
            ..Default::default()
        };

        for index in 0..total {
            let card = ElementRef::nth(STUDENT_CARDS, index);
            let actual = match driver.text_within(&card, STUDENT_CLASS).await {
                Ok(Some(actual)) => actual,
                Ok(None) => continue,
                Err(err) => {
                    log::debug!("reading class of {card}: {err}");
                    continue;
                }
            };

            if actual == class_name {
                verification.matching += 1;
                continue;
            }

            let name = driver
                .text_within(&card, STUDENT_NAME)
                .await
                .ok()
                .flatten()
                .unwrap_or_else(|| format!("Student {}", index + 1));
            let id = driver
                .text_within(&card, STUDENT_ID)
                .await
                .ok()
                .flatten()
                .unwrap_or_else(|| "Unknown ID".to_string());
            verification.mismatched.push(MismatchedStudent {
                index: index + 1,
                name,
                id,
                expected_class: class_name.to_string(),
                actual_class: actual,
            });
        }

        Ok(verification)
    }

    /// Dump probe selector counts and a sidebar HTML snippet for diagnosing
    /// selector drift. The dump is logged as an attachment and returned.
    pub async fn debug_sidebar_structure(&self) -> String {
        let driver = self.page.driver();
        let mut report = String::from("SIDEBAR DEBUG\n");

        if let Err(err) = self.page.take_screenshot("debug_sidebar").await {
            log::warn!("failed to capture debug_sidebar: {err}");
        }

        for probe in DEBUG_PROBES {
            let count = match self.page.count(probe).await {
                Ok(count) => count,
                Err(err) => {
                    report.push_str(&format!("'{probe}': error {err}\n"));
                    continue;
                }
            };
            report.push_str(&format!("'{probe}': {count} elements\n"));
            for index in 0..count.min(5) {
                let text = driver
                    .text(&ElementRef::nth(*probe, index))
                    .await
                    .ok()
                    .flatten()
                    .unwrap_or_default();
                let text: String = text.chars().take(80).collect();
                let marker = if is_class_title(&text) { " [class]" } else { "" };
                report.push_str(&format!("   [{}] {text}{marker}\n", index + 1));
            }
        }

        let snippet = driver
            .evaluate(SIDEBAR_HTML_SCRIPT)
            .await
            .ok()
            .and_then(|value| value.as_str().map(str::to_string))
            .unwrap_or_else(|| "No sidebar found".to_string());
        report.push_str(&format!("\nSidebar HTML snippet:\n{snippet}\n"));

        self.page.logger().attach("Sidebar Structure", report.clone());
        report
    }
}


#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::test_support::{render_sidebar, sidebar_node};
    use super::*;
    use crate::page::test_support::erp_page;
    use crate::testing::{FakeDom, FakeElement, FakePage};

    fn card(name: &str, id: &str, class: &str) -> FakeElement {
        FakeElement::shown()
            .child(STUDENT_NAME, FakeElement::text(name))
            .child(STUDENT_ID, FakeElement::text(id))
            .child(STUDENT_CLASS, FakeElement::text(class))
    }

    #[test]
    fn class_titles_need_both_parentheses() {
        assert!(is_class_title("6ème A (2024-2025)"));
        assert!(!is_class_title("Collège"));
        assert!(!is_class_title("Cycle (primaire"));
    }

    #[tokio::test(start_paused = true)]
    async fn items_are_classified_and_empty_titles_skipped() {
        let reports = tempfile::tempdir().unwrap();
        let fake = FakePage::new();
        fake.set(
            SIDEBAR_ITEM,
            vec![
                sidebar_node("Collège"),
                sidebar_node("6ème A (2024)"),
                FakeElement::shown(),
                FakeElement::shown().child("span", FakeElement::text("5ème B (2024)")),
            ],
        );
        let page = erp_page(&fake, &reports);
        let sidebar = ClassFilterPage::new(&page);

        let items = sidebar.get_all_sidebar_items().await;
        let titles: Vec<(&str, bool)> = items
            .iter()
            .map(|item| (item.title.as_str(), item.is_class))
            .collect();
        assert_eq!(
            titles,
            vec![
                ("Collège", false),
                ("6ème A (2024)", true),
                ("5ème B (2024)", true),
            ]
        );
        assert_eq!(items[2].element, titled_item(SIDEBAR_ITEM, "5ème B (2024)", 0));
    }

    #[test]
    fn titled_items_normalise_whitespace_and_quote_titles() {
        let item = titled_item(SIDEBAR_ITEM, "  l'école   maternelle ", 1);
        assert_eq!(
            item.selector,
            format!("({SIDEBAR_ITEM})[.//span[normalize-space()=\"l'école maternelle\"]]")
        );
        assert_eq!(item.index, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expansion_follows_nodes_inserted_above_later_groups() {
        let reports = tempfile::tempdir().unwrap();
        let fake = FakePage::new();
        fake.update(|dom| render_sidebar(dom, SIDEBAR_ITEM, &["Collège", "Lycée"]));
        fake.on_click(titled_item(SIDEBAR_ITEM, "Collège", 0), |dom: &mut FakeDom| {
            render_sidebar(dom, SIDEBAR_ITEM, &["Collège", "6A (2024)", "Lycée"]);
        });
        fake.on_click(titled_item(SIDEBAR_ITEM, "Lycée", 0), |dom: &mut FakeDom| {
            render_sidebar(
                dom,
                SIDEBAR_ITEM,
                &["Collège", "6A (2024)", "Lycée", "2BAC (2024)"],
            );
        });
        let page = erp_page(&fake, &reports);
        let sidebar = ClassFilterPage::new(&page);

        assert!(sidebar.expand_all_sidebar_items().await);
        let clicked: Vec<ElementRef> = fake.clicks();
        assert_eq!(
            clicked,
            vec![
                titled_item(SIDEBAR_ITEM, "Collège", 0),
                titled_item(SIDEBAR_ITEM, "6A (2024)", 0),
                titled_item(SIDEBAR_ITEM, "Lycée", 0),
                titled_item(SIDEBAR_ITEM, "2BAC (2024)", 0),
            ]
        );

        let classes: Vec<SidebarItem> = sidebar
            .get_all_sidebar_items()
            .await
            .into_iter()
            .filter(|item| item.is_class)
            .collect();
        let titles: Vec<&str> = classes.iter().map(|item| item.title.as_str()).collect();
        assert_eq!(titles, vec!["6A (2024)", "2BAC (2024)"]);

        fake.update(|dom| {
            render_sidebar(
                dom,
                SIDEBAR_ITEM,
                &["Primaire", "Collège", "6A (2024)", "Lycée", "2BAC (2024)"],
            )
        });
        sidebar.click_sidebar_item(&classes[1]).await.unwrap();
        assert_eq!(
            fake.clicks().last(),
            Some(&titled_item(SIDEBAR_ITEM, "2BAC (2024)", 0))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_titles_are_each_expanded_once() {
        let reports = tempfile::tempdir().unwrap();
        let fake = FakePage::new();
        fake.update(|dom| render_sidebar(dom, SIDEBAR_ITEM, &["Tronc commun", "Tronc commun"]));
        let page = erp_page(&fake, &reports);

        assert!(ClassFilterPage::new(&page).expand_all_sidebar_items().await);
        assert_eq!(
            fake.clicks(),
            vec![
                titled_item(SIDEBAR_ITEM, "Tronc commun", 0),
                titled_item(SIDEBAR_ITEM, "Tronc commun", 1),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_selectors_are_tried_in_order() {
        let reports = tempfile::tempdir().unwrap();
        let fake = FakePage::new();
        fake.update(|dom| {
            render_sidebar(dom, SIDEBAR_FALLBACKS[1], &["CP (2024)"]);
            render_sidebar(dom, SIDEBAR_FALLBACKS[2], &["ignored (x)"]);
        });
        let page = erp_page(&fake, &reports);
        let sidebar = ClassFilterPage::new(&page);

        assert!(sidebar.expand_all_sidebar_items().await);
        assert_eq!(fake.clicks(), vec![titled_item(SIDEBAR_FALLBACKS[1], "CP (2024)", 0)]);

        let items = sidebar.get_all_sidebar_items().await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "CP (2024)");
    }

    #[tokio::test(start_paused = true)]
    async fn expansion_without_nodes_reports_nothing_clicked() {
        let reports = tempfile::tempdir().unwrap();
        let fake = FakePage::new();
        let page = erp_page(&fake, &reports);

        assert!(!ClassFilterPage::new(&page).expand_all_sidebar_items().await);
    }

    #[tokio::test(start_paused = true)]
    async fn script_expansion_runs_when_no_class_is_visible() {
        let reports = tempfile::tempdir().unwrap();
        let fake = FakePage::new();
        fake.set(SIDEBAR_ITEM, vec![sidebar_node("Collège")]);
        fake.script("o_toggle_fold", json!(2));
        let page = erp_page(&fake, &reports);
        let sidebar = ClassFilterPage::new(&page);

        let items = sidebar.discover_items().await;
        assert!(items.iter().all(|item| !item.is_class));
        assert_eq!(sidebar.expand_with_script().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn placeholder_means_no_students() {
        let reports = tempfile::tempdir().unwrap();
        let fake = FakePage::new();
        fake.set(STUDENT_CARDS, vec![card("Amine", "1", "CP (2024)")]);
        let page = erp_page(&fake, &reports);
        let sidebar = ClassFilterPage::new(&page);
        assert!(sidebar.has_students().await);

        fake.show_text(NO_STUDENTS_MESSAGE, "Aucun apprenant");
        assert!(!sidebar.has_students().await);
    }

    #[tokio::test(start_paused = true)]
    async fn mismatches_are_collected_with_details() {
        let reports = tempfile::tempdir().unwrap();
        let fake = FakePage::new();
        fake.set(
            STUDENT_CARDS,
            vec![
                card("Amine Idrissi", "A100", "CP (2024)"),
                card("Sara Alaoui", "A101", "CE1 (2024)"),
                FakeElement::shown().child(STUDENT_CLASS, FakeElement::text("CE2 (2024)")),
                FakeElement::shown(),
            ],
        );
        let page = erp_page(&fake, &reports);

        let verification = ClassFilterPage::new(&page)
            .verify_students_match_class("CP (2024)")
            .await
            .unwrap();
        assert_eq!(verification.total, 4);
        assert_eq!(verification.matching, 1);
        assert!(!verification.is_success());
        assert_eq!(
            verification.mismatched,
            vec![
                MismatchedStudent {
                    index: 2,
                    name: "Sara Alaoui".to_string(),
                    id: "A101".to_string(),
                    expected_class: "CP (2024)".to_string(),
                    actual_class: "CE1 (2024)".to_string(),
                },
                MismatchedStudent {
                    index: 3,
                    name: "Student 3".to_string(),
                    id: "Unknown ID".to_string(),
                    expected_class: "CP (2024)".to_string(),
                    actual_class: "CE2 (2024)".to_string(),
                },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn debug_dump_lists_selector_counts() {
        let reports = tempfile::tempdir().unwrap();
        let fake = FakePage::new();
        fake.set(DEBUG_PROBES[0], vec![FakeElement::text("6ème A (2024)")]);
        fake.script("outerHTML", json!("<div class=\"o_search_panel\"></div>"));
        let page = erp_page(&fake, &reports);

        let report = ClassFilterPage::new(&page).debug_sidebar_structure().await;
        assert!(report.contains(&format!("'{}': 1 elements", DEBUG_PROBES[0])));
        assert!(report.contains("6ème A (2024) [class]"));
        assert!(report.contains("o_search_panel"));
        assert_eq!(fake.screenshots().len(), 1);
    }
}
