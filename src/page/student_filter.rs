//! Status filters of the student kanban and the checks that follow them.

use std::fmt;

use serde::Serialize;
use tokio::time::Duration;

use super::roster::SEARCH_INPUT;
use super::{ErpPage, PageError, WaitState};
use crate::browser::{ElementRef, PageDriver};

pub const FILTER_DROPDOWN_BUTTON: &str =
    "//button[contains(@class,'dropdown-toggle o_searchview_dropdown_toggler')]";
pub const FILTER_FACET_TEXT: &str =
    "//div[contains(@class,'o_facet_values position-relative')]//small[1]";
pub const REMOVE_FILTER_BUTTON: &str = "//button[contains(@class,'o_facet_remove oi')]";

pub const STUDENT_CARDS: &str = "//div[contains(@class,'oe_kanban_global_click')]";
pub const STUDENT_LIST_VIEW: &str = "//div[contains(@class,'o_list_view')]";
pub const CARD_CLASS: &str = "//i[contains(@class,'icon na-layer-group-2')]/following-sibling::span";

pub const NON_INSCRIT_LABEL: &str = "//span[text()='Non-inscrit']";
pub const NON_REINSCRIT_LABEL: &str = "//span[text()='Non-réinscrit']";
pub const RADIEE_LABEL: &str = "//span[text()='Inscription radiée']";
pub const ANNULEE_LABEL: &str = "//span[text()='Inscription annulée']";
pub const SANS_FAMILLE_IMAGE: &str = "//img[@alt='non affecté']";

pub const SETTINGS_ICON: &str = "//i[@class='fa fa-cog']";
pub const UNARCHIVE_OPTION: &str = "//span[@title='Désarchiver']";
pub const MISSING_DOCUMENT_BUTTON: &str = "//button[@invisible='not sb_total_documents']";

/// Cards inspected by the sample checks.
pub const SAMPLE_SIZE: usize = 3;

const FILTER_CLICK_DELAY: Duration = Duration::from_millis(5_000);
const DETAIL_TIMEOUT: Duration = Duration::from_millis(3_000);
const CARD_PROBE: Duration = Duration::from_millis(1_000);
const LIST_LOADING_TIMEOUT: Duration = Duration::from_millis(8_000);

/// Condition sampled over the first cards after a filter applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CardCheck {
    Label(&'static str),
    EmptyClass,
    SansFamilleImage,
}

impl fmt::Display for CardCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CardCheck::Label(selector) => write!(f, "cards show label {selector}"),
            CardCheck::EmptyClass => f.write_str("cards have no class"),
            CardCheck::SansFamilleImage => f.write_str("cards show the 'non affecté' image"),
        }
    }
}

/// Check performed on the first student's detail view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DetailCheck {
    UnarchiveOption,
    MissingDocumentButton,
}

impl fmt::Display for DetailCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetailCheck::UnarchiveOption => f.write_str("settings menu offers Désarchiver"),
            DetailCheck::MissingDocumentButton => f.write_str("missing document button shown"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StatusFilter {
    NonInscrit,
    NonReinscrit,
    Radiee,
    Annulee,
    NonInscritArchive,
    SansFamille,
    ManqueDocument,
}

impl StatusFilter {
    pub const ALL: [StatusFilter; 7] = [
        StatusFilter::NonInscrit,
        StatusFilter::NonReinscrit,
        StatusFilter::Radiee,
        StatusFilter::Annulee,
        StatusFilter::NonInscritArchive,
        StatusFilter::SansFamille,
        StatusFilter::ManqueDocument,
    ];

    pub fn option_selector(self) -> &'static str {
        match self {
            StatusFilter::NonInscrit => "//span[text()='Non inscrit']",
            StatusFilter::NonReinscrit => "//span[text()='Non réinscrit']",
            StatusFilter::Radiee => "//span[@title='Radiée (Archivé)']",
            StatusFilter::Annulee => "//span[text()='Annulée (Archivé)']",
            StatusFilter::NonInscritArchive => "//span[text()='Non-inscrit (Archivé)']",
            StatusFilter::SansFamille => "//span[text()='Sans famille']",
            StatusFilter::ManqueDocument => "//span[text()='Manque document']",
        }
    }

    /// Exact facet text once the filter is active.
    pub fn facet_label(self) -> &'static str {
        match self {
            StatusFilter::NonInscrit => "Non inscrit",
            StatusFilter::NonReinscrit => "Non réinscrit",
            StatusFilter::Radiee => "Radiée (Archivé)",
            StatusFilter::Annulee => "Annulée (Archivé)",
            StatusFilter::NonInscritArchive => "Non-inscrit (Archivé)",
            StatusFilter::SansFamille => "Sans famille",
            StatusFilter::ManqueDocument => "Manque document",
        }
    }

    pub fn card_checks(self) -> &'static [CardCheck] {
        match self {
            StatusFilter::NonInscrit | StatusFilter::NonInscritArchive => {
                &[CardCheck::Label(NON_INSCRIT_LABEL), CardCheck::EmptyClass]
            }
            StatusFilter::NonReinscrit => {
                &[CardCheck::Label(NON_REINSCRIT_LABEL), CardCheck::EmptyClass]
            }
            StatusFilter::Radiee => &[CardCheck::Label(RADIEE_LABEL)],
            StatusFilter::Annulee => &[CardCheck::Label(ANNULEE_LABEL)],
            StatusFilter::SansFamille => &[CardCheck::SansFamilleImage],
            StatusFilter::ManqueDocument => &[],
        }
    }

    pub fn detail_check(self) -> Option<DetailCheck> {
        match self {
            StatusFilter::NonInscritArchive => Some(DetailCheck::UnarchiveOption),
            StatusFilter::ManqueDocument => Some(DetailCheck::MissingDocumentButton),
            _ => None,
        }
    }
}

impl fmt::Display for StatusFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.facet_label())
    }
}

/// Majority rule of the sample checks: `hits >= checked / 2` (integer
/// division), with nothing to check counting as failure.
pub fn sample_passes(hits: usize, checked: usize) -> bool {
    checked > 0 && hits >= checked / 2
}

pub struct StudentFilterPage<'p, D: PageDriver> {
    page: &'p ErpPage<D>,
}

impl<'p, D: PageDriver> StudentFilterPage<'p, D> {
    pub fn new(page: &'p ErpPage<D>) -> Self {
        Self { page }
    }

    pub async fn navigate_from_login(&self) -> Result<(), PageError> {
        self.page.open_apprenant_menu().await?;
        self.wait_for_page_loaded().await;
        Ok(())
    }

    pub async fn wait_for_page_loaded(&self) {
        self.page.wait_for_loading(LIST_LOADING_TIMEOUT).await;
        let default = Duration::from_millis(self.page.timeouts().default_ms);
        if let Err(err) = self
            .page
            .wait_for_any(&[STUDENT_CARDS, STUDENT_LIST_VIEW], default)
            .await
        {
            log::debug!("neither cards nor list rendered: {err}");
        }
    }

    pub async fn open_filter_dropdown(&self) {
        if let Err(err) = self
            .page
            .click_with_retry(FILTER_DROPDOWN_BUTTON, 3, FILTER_CLICK_DELAY)
            .await
        {
            log::debug!("filter dropdown not opened: {err}");
        }
    }

    /// Open the dropdown, pick `filter`, then focus the search box to close
    /// the dropdown. Errors are logged, not returned.
    pub async fn apply_filter(&self, filter: StatusFilter) {
        self.open_filter_dropdown().await;
        if let Err(err) = self
            .page
            .click_with_retry(filter.option_selector(), 3, FILTER_CLICK_DELAY)
            .await
        {
            log::error!("error applying filter {filter}: {err}");
            return;
        }
        if let Err(err) = self.page.driver().click(&ElementRef::first(SEARCH_INPUT)).await {
            log::debug!("search input not focusable: {err}");
        }
        self.wait_for_page_loaded().await;
    }

    pub async fn remove_filter(&self) {
        if !self
            .page
            .is_element_visible(REMOVE_FILTER_BUTTON, DETAIL_TIMEOUT)
            .await
        {
            return;
        }
        match self
            .page
            .click_with_retry(REMOVE_FILTER_BUTTON, 3, DETAIL_TIMEOUT)
            .await
        {
            Ok(()) => self.wait_for_page_loaded().await,
            Err(err) => log::debug!("filter facet not removed: {err}"),
        }
    }

    pub async fn get_filter_facet_text(&self) -> Option<String> {
        self.page
            .get_element_text(FILTER_FACET_TEXT, DETAIL_TIMEOUT)
            .await
    }

    async fn sample(&self) -> Vec<ElementRef> {
        let count = self.page.count(STUDENT_CARDS).await.unwrap_or(0);
        (0..count.min(SAMPLE_SIZE))
            .map(|index| ElementRef::nth(STUDENT_CARDS, index))
            .collect()
    }

    async fn card_has(&self, card: &ElementRef, selector: &str) -> bool {
        self.page.is_visible_within(card, selector, CARD_PROBE).await
    }

    pub async fn check_all_students_have_label(&self, label_selector: &str) -> bool {
        let cards = self.sample().await;
        let mut hits = 0;
        for card in &cards {
            if self.card_has(card, label_selector).await {
                hits += 1;
            }
        }
        sample_passes(hits, cards.len())
    }

    /// Class missing, blank or `--` counts as empty.
    pub async fn check_all_students_class_is_empty(&self) -> bool {
        let cards = self.sample().await;
        let driver = self.page.driver();
        let mut hits = 0;
        for card in &cards {
            if !self.card_has(card, CARD_CLASS).await {
                hits += 1;
                continue;
            }
            match driver.text_within(card, CARD_CLASS).await {
                Ok(Some(text)) if !text.is_empty() && text != "--" => {}
                _ => hits += 1,
            }
        }
        sample_passes(hits, cards.len())
    }

    pub async fn check_all_students_have_sans_famille_image(&self) -> bool {
        self.check_all_students_have_label(SANS_FAMILLE_IMAGE).await
    }

    pub async fn run_card_check(&self, check: CardCheck) -> bool {
        match check {
            CardCheck::Label(selector) => self.check_all_students_have_label(selector).await,
            CardCheck::EmptyClass => self.check_all_students_class_is_empty().await,
            CardCheck::SansFamilleImage => self.check_all_students_have_sans_famille_image().await,
        }
    }

    pub async fn click_first_student_card(&self) -> bool {
        let first = ElementRef::first(STUDENT_CARDS);
        if self
            .page
            .wait_for(&first, WaitState::Visible, DETAIL_TIMEOUT)
            .await
            .is_err()
        {
            return false;
        }
        match self
            .page
            .click_element_with_retry(&first, 3, DETAIL_TIMEOUT)
            .await
        {
            Ok(()) => {
                self.page.wait_for_default_loading().await;
                true
            }
            Err(err) => {
                log::warn!("could not open the first student: {err}");
                false
            }
        }
    }

    pub async fn check_settings_and_unarchive_option(&self) -> bool {
        if !self.page.is_element_visible(SETTINGS_ICON, DETAIL_TIMEOUT).await {
            return false;
        }
        if let Err(err) = self
            .page
            .click_with_retry(SETTINGS_ICON, 3, DETAIL_TIMEOUT)
            .await
        {
            log::warn!("settings menu not opened: {err}");
            return false;
        }
        self.page
            .is_element_visible(UNARCHIVE_OPTION, DETAIL_TIMEOUT)
            .await
    }

    pub async fn check_missing_document_button(&self) -> bool {
        self.page
            .is_element_visible(MISSING_DOCUMENT_BUTTON, DETAIL_TIMEOUT)
            .await
    }

    /// Browser back, falling back to the menu path when history fails.
    pub async fn go_back_to_student_list(&self) -> bool {
        match self.page.go_back().await {
            Ok(()) => {
                self.wait_for_page_loaded().await;
                true
            }
            Err(err) => {
                log::warn!("history back failed ({err}), re-opening the student menu");
                self.navigate_from_login().await.is_ok()
            }
        }
    }

    /// Open the first card, run `check`, return to the list. `None` when no
    /// card could be opened.
    pub async fn run_detail_check(&self, check: DetailCheck) -> Option<bool> {
        if !self.click_first_student_card().await {
            return None;
        }
        let passed = match check {
            DetailCheck::UnarchiveOption => self.check_settings_and_unarchive_option().await,
            DetailCheck::MissingDocumentButton => self.check_missing_document_button().await,
        };
        self.go_back_to_student_list().await;
        Some(passed)
    }
}
