// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Slider pages and the display seam.
//!
//! A [`Renderer`] task asks a [`PageSource`] for the text of a page and hands the
//! result to a [`Display`]. Collecting a page can take as long as its slowest
//! lookup, so it never runs on the control loop. Drawing on the OLED itself is
//! outside this crate; the shipped [`LogDisplay`] writes each page through the
//! logger.

use crate::config::Config;
use std::fmt;
use std::future::Future;
use std::io;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// One slider screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    /// Uptime, CPU temperature, IP address.
    System,
    /// CPU load, memory, root disk.
    Resources,
    /// Usage per disk.
    Disks,
    /// Farm status, balance and height.
    Farm,
}

impl fmt::Display for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Page::System => "system",
            Page::Resources => "resources",
            Page::Disks => "disks",
            Page::Farm => "farm",
        })
    }
}

/// Pages in slider order for a configuration.
pub fn pages(config: &Config) -> Vec<Page> {
    let mut pages = vec![Page::System, Page::Resources, Page::Disks];
    if config.farm.enabled {
        pages.push(Page::Farm);
    }
    pages
}

/// Rendered text of a page.
#[derive(Debug, Clone, PartialEq)]
pub struct PageView {
    pub page: Page,
    pub lines: Vec<String>,
}

/// Produces the text for a page, typically by querying telemetry.
pub trait PageSource {
    fn collect(&mut self, page: Page) -> impl Future<Output = PageView> + Send;
}

/// Something that can show a page.
pub trait Display {
    fn show(&mut self, view: &PageView) -> io::Result<()>;
}

/// Writes pages to the log instead of a panel.
#[derive(Debug, Clone, Default)]
pub struct LogDisplay;

impl LogDisplay {
    pub fn new(rotate: bool) -> Self {
        if rotate {
            log::debug!("Display rotation requested; the log display ignores it");
        }
        Self
    }
}

impl Display for LogDisplay {
    fn show(&mut self, view: &PageView) -> io::Result<()> {
        log::info!("[{}] {}", view.page, view.lines.join(" | "));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Renderer
// ---------------------------------------------------------------------------

/// Handle to the background task that collects and shows pages.
///
/// Requests never wait for a render. When several pile up behind a slow one,
/// only the latest is drawn. Dropping the handle aborts the task, along with any
/// lookup still running.
#[derive(Debug)]
pub struct Renderer {
    requests: mpsc::UnboundedSender<Page>,
    task: JoinHandle<()>,
}

impl Renderer {
    pub fn spawn<S, D>(source: S, display: D) -> Self
    where
        S: PageSource + Send + 'static,
        D: Display + Send + 'static,
    {
        let (requests, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(render_loop(source, display, rx));
        Self { requests, task }
    }

    /// Queue `page` for drawing.
    pub fn request(&self, page: Page) {
        if self.requests.send(page).is_err() {
            log::warn!("Renderer is gone, {page} page not drawn");
        }
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn render_loop<S: PageSource, D: Display>(
    mut source: S,
    mut display: D,
    mut requests: mpsc::UnboundedReceiver<Page>,
) {
    while let Some(mut page) = requests.recv().await {
        while let Ok(next) = requests.try_recv() {
            page = next;
        }
        let view = source.collect(page).await;
        if let Err(e) = display.show(&view) {
            log::error!("Failed to show {} page: {e}", view.page);
        }
    }
}

/// CPU temperature line in the configured unit.
pub fn format_temperature(celsius: f64, fahrenheit: bool) -> String {
    if fahrenheit {
        format!("CPU Temp: {:.0}°F", celsius * 1.8 + 32.0)
    } else {
        format!("CPU Temp: {celsius:.1}°C")
    }
}
