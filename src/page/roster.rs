//! Student roster (kanban) with pagination, enrolment markers and search.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::time::Duration;

use super::{ACTION_MANAGER, ErpPage, PageError, WaitState, file_stem};
use crate::browser::{ElementRef, PageDriver};

pub const STUDENT_CARDS: &str =
    "(//div[contains(@class,'oe_kanban_global_click o_kanban_record_has_image_fill')])";
pub const PAGINATION_INFO: &str = "//nav[contains(@class,'o_pager d-flex')]";
pub const PAGER_NEXT: &str = "button.o_pager_next";
pub const PAGER_PREVIOUS: &str = "button.o_pager_previous";
pub const SEARCH_INPUT: &str = "//input[contains(@class,'o_searchview_input o_input')]";

/// Records per kanban page.
pub const STUDENTS_PER_PAGE: usize = 80;
/// Hard stop for the enrolled-students walk.
pub const MAX_PAGES: usize = 10;

const STUDENTS_INFO_SCRIPT: &str = r#"(function studentsInfo() {
  const cards = document.querySelectorAll('.o_kanban_record');
  return Array.from(cards).map((card) => {
    const nameNode = card.querySelector('.o_kanban_record_title');
    const classNode = card.querySelector('.o_kanban_record_subtitle');
    const idNode = card.querySelector('i.na-input-numeric + span');
    const enrolledIcon = card.querySelector('.text-success')
      || card.querySelector('i.fa-check-circle')
      || card.querySelector('i[title="circle-success"]');
    return {
      name: nameNode ? nameNode.textContent.trim() : 'Unknown',
      class: classNode ? classNode.textContent.trim() : '--',
      enrolled: !!enrolledIcon,
      id: idNode ? idNode.textContent.trim() : null,
    };
  });
})()"#;

const ENROLLED_COUNT_SCRIPT: &str = r#"(function enrolledCount() {
  let count = 0;
  for (const card of document.querySelectorAll('.o_kanban_record')) {
    if (card.querySelector('.text-success')
      || card.querySelector('i.fa-check-circle')
      || card.querySelector('i[title="circle-success"]')) {
      count += 1;
    }
  }
  return count;
})()"#;

const HAS_NEXT_SCRIPT: &str = r#"(function pagerHasNext() {
  const next = document.querySelector('button.o_pager_next');
  return !!next && !next.disabled;
})()"#;

const PAGE_SETTLE: Duration = Duration::from_secs(1);

static PAGER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+)(?:\s*-\s*(\d+))?\s*/\s*(\d+)").expect("pager pattern is valid")
});

/// Pager text such as `1-80 / 321`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationText {
    pub first: usize,
    pub last: usize,
    pub total: usize,
}

impl PaginationText {
    pub fn parse(text: &str) -> Option<Self> {
        let captures = PAGER_PATTERN.captures(text)?;
        let number = |index: usize| captures.get(index)?.as_str().parse::<usize>().ok();
        let first = number(1)?;
        let last = number(2).unwrap_or(first);
        let total = number(3)?;
        Some(PaginationText { first, last, total })
    }
}

/// Pages needed to show `total` records.
pub fn expected_pages(total: usize) -> usize {
    total.div_ceil(STUDENTS_PER_PAGE)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentRecord {
    pub name: String,
    #[serde(rename = "class")]
    pub class_label: String,
    #[serde(default)]
    pub enrolled: bool,
    #[serde(default)]
    pub id: Option<String>,
}

/// Result of walking the roster pages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnrolledScan {
    pub total_students: usize,
    pub expected_pages: usize,
    pub pages_visited: usize,
    /// Enrolled records in page order. A record seen on two pages is listed
    /// twice.
    pub students: Vec<StudentRecord>,
}

impl EnrolledScan {
    pub fn total_enrolled(&self) -> usize {
        self.students.len()
    }

    /// Ids listed more than once, with their occurrence count.
    pub fn duplicate_ids(&self) -> BTreeMap<String, usize> {
        let mut seen: BTreeMap<String, usize> = BTreeMap::new();
        for id in self.students.iter().filter_map(|s| s.id.as_ref()) {
            *seen.entry(id.clone()).or_default() += 1;
        }
        seen.retain(|_, count| *count > 1);
        seen
    }
}

/// First card names observed while paging forward and back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaginationRoundTrip {
    pub first_on_page: String,
    pub first_on_next: String,
    pub first_after_back: String,
}

impl PaginationRoundTrip {
    pub fn moved(&self) -> bool {
        self.first_on_page != self.first_on_next
    }

    pub fn restored(&self) -> bool {
        self.first_on_page == self.first_after_back
    }
}

pub struct RosterPage<'p, D: PageDriver> {
    page: &'p ErpPage<D>,
}

impl<'p, D: PageDriver> RosterPage<'p, D> {
    pub fn new(page: &'p ErpPage<D>) -> Self {
        Self { page }
    }

    pub async fn navigate_from_login(&self) -> Result<(), PageError> {
        self.page.open_apprenant_menu().await?;
        self.wait_for_page_loaded().await?;
        if let Err(err) = self.page.take_screenshot("navigation_to_student_page").await {
            log::warn!("failed to capture navigation_to_student_page: {err}");
        }
        Ok(())
    }

    pub async fn wait_for_page_loaded(&self) -> Result<(), PageError> {
        let navigation = Duration::from_millis(self.page.timeouts().navigation_ms);
        self.page
            .wait_for_selector(ACTION_MANAGER, WaitState::Visible, navigation)
            .await?;
        if let Err(err) = self
            .page
            .wait_for_selector(STUDENT_CARDS, WaitState::Visible, navigation)
            .await
        {
            log::warn!("no student card rendered: {err}");
        }
        self.page.wait_for_default_loading().await;
        self.page.settle(PAGE_SETTLE).await;
        Ok(())
    }

    pub async fn is_student_page_displayed(&self) -> bool {
        let driver = self.page.driver();
        for selector in [ACTION_MANAGER, STUDENT_CARDS, PAGINATION_INFO] {
            if !driver
                .is_visible(&ElementRef::first(selector))
                .await
                .unwrap_or(false)
            {
                return false;
            }
        }
        true
    }

    pub async fn pagination(&self) -> Option<PaginationText> {
        let text = self
            .page
            .driver()
            .text(&ElementRef::first(PAGINATION_INFO))
            .await
            .ok()
            .flatten()?;
        PaginationText::parse(&text)
    }

    /// Total records according to the pager, 0 when it cannot be read.
    pub async fn get_total_students_count(&self) -> usize {
        match self.pagination().await {
            Some(pager) => pager.total,
            None => {
                log::warn!("pager text unavailable, assuming no students");
                0
            }
        }
    }

    pub async fn get_visible_students_count(&self) -> usize {
        self.page.count(STUDENT_CARDS).await.unwrap_or(0)
    }

    /// Read every card on the current page in one script evaluation.
    pub async fn get_students_info(&self) -> Vec<StudentRecord> {
        let parsed = match self.page.driver().evaluate(STUDENTS_INFO_SCRIPT).await {
            Ok(value) => serde_json::from_value::<Vec<StudentRecord>>(value)
                .map_err(|err| err.to_string()),
            Err(err) => Err(err.to_string()),
        };
        match parsed {
            Ok(students) => students,
            Err(err) => {
                log::error!("error getting students info: {err}");
                self.page.capture_failure("error_getting_students").await;
                Vec::new()
            }
        }
    }

    pub async fn get_enrolled_students_count(&self) -> usize {
        match self.page.driver().evaluate(ENROLLED_COUNT_SCRIPT).await {
            Ok(value) => value.as_u64().unwrap_or(0) as usize,
            Err(err) => {
                log::error!("error counting enrolled students: {err}");
                0
            }
        }
    }

    pub async fn has_next_page(&self) -> bool {
        self.page
            .driver()
            .evaluate(HAS_NEXT_SCRIPT)
            .await
            .ok()
            .and_then(|value| value.as_bool())
            .unwrap_or(false)
    }

    async fn collect_enrolled(&self, page_number: usize, scan: &mut EnrolledScan) {
        let enrolled: Vec<StudentRecord> = self
            .get_students_info()
            .await
            .into_iter()
            .filter(|student| student.enrolled)
            .collect();
        log::info!("page {page_number}: {} enrolled students", enrolled.len());
        scan.students.extend(enrolled);
        scan.pages_visited = page_number;

        if let Err(err) = self
            .page
            .take_screenshot(&format!("enrolled_students_page_{page_number}"))
            .await
        {
            log::warn!("failed to capture page {page_number}: {err}");
        }
    }

    /// Walk forward through the pager collecting enrolled records, bounded by
    /// the expected page count and [`MAX_PAGES`].
    pub async fn get_all_enrolled_students(&self) -> EnrolledScan {
        let total_students = self.get_total_students_count().await;
        let mut scan = EnrolledScan {
            total_students,
            expected_pages: expected_pages(total_students),
            ..Default::default()
        };
        log::info!(
            "{total_students} students according to the pager, {} pages expected",
            scan.expected_pages
        );

        let mut current = 1;
        self.collect_enrolled(current, &mut scan).await;

        while self.has_next_page().await && current < scan.expected_pages && current < MAX_PAGES {
            if let Err(err) = self.page.driver().click(&ElementRef::first(PAGER_NEXT)).await {
                log::warn!("could not open page {}: {err}", current + 1);
                break;
            }
            self.page.wait_for_default_loading().await;
            current += 1;
            self.collect_enrolled(current, &mut scan).await;
        }

        let duplicates = scan.duplicate_ids();
        if !duplicates.is_empty() {
            log::warn!("students listed on several pages: {duplicates:?}");
        }
        scan
    }

    async fn turn_page(&self, selector: &str) -> Result<bool, PageError> {
        let button = ElementRef::first(selector);
        let driver = self.page.driver();
        if !driver.is_visible(&button).await? || !driver.is_enabled(&button).await? {
            return Ok(false);
        }
        self.page.click(selector).await?;
        self.page.wait_for_default_loading().await;
        self.wait_for_page_loaded().await?;
        Ok(true)
    }

    pub async fn navigate_to_next_page(&self) -> bool {
        self.turn_page(PAGER_NEXT).await.unwrap_or_else(|err| {
            log::error!("error navigating to next page: {err}");
            false
        })
    }

    pub async fn navigate_to_previous_page(&self) -> bool {
        self.turn_page(PAGER_PREVIOUS).await.unwrap_or_else(|err| {
            log::error!("error navigating to previous page: {err}");
            false
        })
    }

    async fn first_card_name(&self) -> Option<String> {
        self.get_students_info()
            .await
            .into_iter()
            .next()
            .map(|student| student.name)
    }

    /// Go to the next page and back, recording the first card each time.
    /// `None` when there is no next page.
    pub async fn verify_pagination_round_trip(&self) -> Result<Option<PaginationRoundTrip>, PageError> {
        let Some(first_on_page) = self.first_card_name().await else {
            return Ok(None);
        };
        if !self.navigate_to_next_page().await {
            return Ok(None);
        }
        let first_on_next = self.first_card_name().await.unwrap_or_default();
        if !self.navigate_to_previous_page().await {
            return Err(PageError::Unexpected(
                "previous page control unavailable after moving forward".to_string(),
            ));
        }
        let first_after_back = self.first_card_name().await.unwrap_or_default();

        Ok(Some(PaginationRoundTrip {
            first_on_page,
            first_on_next,
            first_after_back,
        }))
    }

    /// Clear the search box, type `query` and submit it.
    pub async fn search_student(&self, query: &str) -> Result<(), PageError> {
        self.page.click(SEARCH_INPUT).await?;
        self.page.fill_field(SEARCH_INPUT, query, true).await?;
        self.page.press(SEARCH_INPUT, "Enter").await?;
        self.page.wait_for_default_loading().await;
        self.wait_for_page_loaded().await?;
        self.page
            .take_screenshot(&format!("search_{}", file_stem(query)))
            .await?;
        Ok(())
    }
}
