//! List view selection and the XLSX/CSV export dialog.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tokio::time::{Duration, Instant, sleep};

use super::ErpPage;
use crate::browser::PageDriver;

pub const LIST_VIEW_BUTTON: &str = "//button[@data-tooltip='List']";
pub const SELECT_ALL_CHECKBOX: &str = "(//input[@class='form-check-input'])[1]";
pub const SELECT_ALL_DOMAIN: &str = "//a[contains(@class,'o_list_select_domain ms-3')]";
pub const SELECTED_COUNT_TEXT: &str = "//div[contains(@class,'o_list_selection_box')]//span";
pub const ACTIONS_DROPDOWN: &str = "(//button[contains(@class,'dropdown-toggle btn')])[1]";
pub const EXPORT_OPTION: &str = "//span[text()='Exporter']";
pub const EXPORT_DIALOG: &str = "//div[@class='modal-content o_export_data_dialog']";
pub const EXPORT_BUTTON: &str = "(//button[contains(@class,'btn btn-primary')])[4]";

const DOWNLOAD_POLL: Duration = Duration::from_millis(500);
const STEP_SETTLE: Duration = Duration::from_millis(500);
const DIALOG_SETTLE: Duration = Duration::from_millis(1_000);

static COUNT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)").expect("selected count pattern compiles"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Xlsx,
    Csv,
}

impl ExportFormat {
    pub fn radio_selector(self) -> &'static str {
        match self {
            ExportFormat::Xlsx => "//input[@type='radio' and @data-format='xlsx']",
            ExportFormat::Csv => "//input[@type='radio' and @data-format='csv']",
        }
    }

    /// File name Odoo gives the export of the student status model.
    pub fn default_filename(self) -> &'static str {
        match self {
            ExportFormat::Xlsx => "Statut de lapprenant (acces.statut.apprenant).xlsx",
            ExportFormat::Csv => "Statut de lapprenant (acces.statut.apprenant).csv",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFormat::Xlsx => f.write_str("XLSX"),
            ExportFormat::Csv => f.write_str("CSV"),
        }
    }
}

/// Outcome of polling the downloads directory for one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadCheck {
    pub found: bool,
    pub path: PathBuf,
    pub size: u64,
    pub elapsed: Duration,
}

impl DownloadCheck {
    pub fn is_complete(&self) -> bool {
        self.found && self.size > 0
    }
}

/// Step-by-step record of one export attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportResult {
    pub format: ExportFormat,
    pub navigated: bool,
    pub selected: bool,
    pub dialog_opened: bool,
    pub export_started: bool,
    pub file_downloaded: bool,
    pub selected_count: Option<usize>,
    pub file_path: Option<PathBuf>,
    pub file_size: u64,
    pub download_time: Option<Duration>,
}

impl ExportResult {
    fn new(format: ExportFormat) -> Self {
        ExportResult {
            format,
            navigated: false,
            selected: false,
            dialog_opened: false,
            export_started: false,
            file_downloaded: false,
            selected_count: None,
            file_path: None,
            file_size: 0,
            download_time: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.navigated
            && self.selected
            && self.dialog_opened
            && self.export_started
            && self.file_downloaded
            && self.file_size > 0
    }

    /// First step that did not complete.
    pub fn failed_step(&self) -> Option<&'static str> {
        [
            (self.navigated, "navigation to the student list"),
            (self.selected, "selection of all students"),
            (self.dialog_opened, "export dialog"),
            (self.export_started, "export start"),
            (self.file_downloaded, "file download"),
        ]
        .into_iter()
        .find_map(|(done, step)| (!done).then_some(step))
    }
}

/// First integer in the selection box text, e.g. `"412 sélectionnés"`.
pub fn parse_selected_count(text: &str) -> Option<usize> {
    COUNT_PATTERN
        .captures(text)
        .and_then(|captures| captures.get(1))
        .and_then(|digits| digits.as_str().parse().ok())
}

pub struct ListActionsPage<'p, D: PageDriver> {
    page: &'p ErpPage<D>,
}

impl<'p, D: PageDriver> ListActionsPage<'p, D> {
    pub fn new(page: &'p ErpPage<D>) -> Self {
        Self { page }
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.page.config().resolved_downloads_dir()
    }

    /// Student menu, then the list view toggle.
    pub async fn navigate_to_student_list(&self) -> bool {
        if let Err(err) = self.page.open_apprenant_menu().await {
            log::error!("error navigating to the student list: {err}");
            self.page.capture_failure("navigate_list_error").await;
            return false;
        }
        self.page.wait_for_loading(Duration::from_secs(5)).await;

        if !self
            .page
            .is_element_visible(LIST_VIEW_BUTTON, Duration::from_secs(3))
            .await
        {
            log::warn!("list view button not found");
            return false;
        }
        match self.page.click(LIST_VIEW_BUTTON).await {
            Ok(()) => {
                self.page.wait_for_default_loading().await;
                true
            }
            Err(err) => {
                log::error!("error switching to the list view: {err}");
                false
            }
        }
    }

    pub async fn select_all_students(&self) -> bool {
        if !self
            .page
            .is_element_visible(SELECT_ALL_CHECKBOX, Duration::from_secs(3))
            .await
        {
            log::warn!("select-all checkbox not found");
            return false;
        }
        if let Err(err) = self.page.click(SELECT_ALL_CHECKBOX).await {
            log::error!("error selecting all students: {err}");
            return false;
        }
        sleep(STEP_SETTLE).await;

        if self
            .page
            .is_element_visible(SELECT_ALL_DOMAIN, Duration::from_secs(2))
            .await
        {
            match self.page.click(SELECT_ALL_DOMAIN).await {
                Ok(()) => sleep(STEP_SETTLE).await,
                Err(err) => log::warn!("could not select the entire domain: {err}"),
            }
        }

        self.page
            .is_element_visible(SELECTED_COUNT_TEXT, Duration::from_secs(2))
            .await
    }

    pub async fn get_selected_count(&self) -> Option<usize> {
        let text = self
            .page
            .get_element_text(SELECTED_COUNT_TEXT, Duration::from_secs(2))
            .await?;
        parse_selected_count(&text)
    }

    pub async fn open_actions_menu(&self) -> bool {
        match self.page.click(ACTIONS_DROPDOWN).await {
            Ok(()) => true,
            Err(err) => {
                log::warn!("actions menu not opened: {err}");
                false
            }
        }
    }

    /// Click "Exporter", opening the actions menu first when the option is
    /// not already on screen. True once the export dialog is visible.
    pub async fn select_export_option(&self) -> bool {
        if !self
            .page
            .is_element_visible(EXPORT_OPTION, Duration::from_secs(1))
            .await
            && !self.open_actions_menu().await
        {
            return false;
        }
        if let Err(err) = self.page.click(EXPORT_OPTION).await {
            log::error!("export option not clickable: {err}");
            return false;
        }
        sleep(DIALOG_SETTLE).await;
        self.page
            .is_element_visible(EXPORT_DIALOG, Duration::from_secs(5))
            .await
    }

    pub async fn export(&self, format: ExportFormat) -> bool {
        let radio = format.radio_selector();
        if !self.page.is_element_visible(radio, Duration::from_secs(2)).await {
            log::warn!("{format} format option not found");
            return false;
        }
        if let Err(err) = self.page.click(radio).await {
            log::error!("error choosing {format}: {err}");
            return false;
        }
        if !self
            .page
            .is_element_visible(EXPORT_BUTTON, Duration::from_secs(3))
            .await
        {
            log::warn!("export button not found");
            return false;
        }
        match self.page.click(EXPORT_BUTTON).await {
            Ok(()) => {
                sleep(DIALOG_SETTLE).await;
                true
            }
            Err(err) => {
                log::error!("error starting the {format} export: {err}");
                false
            }
        }
    }

    /// Poll the downloads directory until `filename` exists or `timeout`
    /// elapses.
    pub async fn verify_file_downloaded(&self, filename: &str, timeout: Duration) -> DownloadCheck {
        wait_for_download(&self.downloads_dir().join(filename), timeout).await
    }

    /// Run every export step for `format`, stopping at the first failure.
    pub async fn complete_export(&self, format: ExportFormat) -> ExportResult {
        let mut result = ExportResult::new(format);

        result.navigated = self.navigate_to_student_list().await;
        if !result.navigated {
            return result;
        }

        result.selected = self.select_all_students().await;
        if !result.selected {
            return result;
        }
        result.selected_count = self.get_selected_count().await;
        if let Some(count) = result.selected_count {
            log::info!("{count} students selected for export");
        }

        result.dialog_opened = self.select_export_option().await;
        if !result.dialog_opened {
            return result;
        }

        let target = self.downloads_dir().join(format.default_filename());
        remove_stale_download(&target).await;

        result.export_started = self.export(format).await;
        if !result.export_started {
            return result;
        }

        let budget = Duration::from_millis(self.page.timeouts().download_ms);
        let check = wait_for_download(&target, budget).await;
        result.file_downloaded = check.found;
        result.file_size = check.size;
        result.download_time = check.found.then_some(check.elapsed);
        result.file_path = Some(check.path);
        if !result.file_downloaded {
            self.page
                .capture_failure(&format!("export_{}_missing", format.to_string().to_lowercase()))
                .await;
        }
        result
    }
}

async fn remove_stale_download(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => log::debug!("removed previous export {}", path.display()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => log::warn!("could not remove previous export {}: {err}", path.display()),
    }
}

async fn wait_for_download(path: &Path, timeout: Duration) -> DownloadCheck {
    let started = Instant::now();
    loop {
        if let Ok(metadata) = tokio::fs::metadata(path).await {
            if metadata.is_file() {
                let check = DownloadCheck {
                    found: true,
                    path: path.to_path_buf(),
                    size: metadata.len(),
                    elapsed: started.elapsed(),
                };
                log::info!(
                    "downloaded {} ({} bytes) in {:.1}s",
                    path.display(),
                    check.size,
                    check.elapsed.as_secs_f64()
                );
                return check;
            }
        }
        if started.elapsed() >= timeout {
            log::warn!("{} not downloaded within {timeout:?}", path.display());
            return DownloadCheck {
                found: false,
                path: path.to_path_buf(),
                size: 0,
                elapsed: started.elapsed(),
            };
        }
        sleep(DOWNLOAD_POLL).await;
    }
}
