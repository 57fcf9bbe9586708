//! Render targets.
//!
//! The engine never draws pixels itself; it mutates an axes-like handle
//! through the [`RenderTarget`] trait. [`TraceTarget`] is the recording
//! implementation used by the CLI and the tests: every call is appended
//! to a shared [`TraceLog`] that can be inspected after an update cycle.

use std::sync::{Arc, Mutex};

/// Identifies the figure a target belongs to. Two targets on the same
/// figure share one redraw.
pub type FigureId = u64;

/// Identifies an artist created by a plot call, so it can be removed
/// again when the plot is re-made.
pub type ArtistId = u64;

/// Line styling used by plot formatoptions.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LineStyle {
    pub color: Option<String>,
    pub width: Option<f64>,
    pub marker: Option<String>,
}

/// An axes-like drawing surface.
pub trait RenderTarget: Send {
    /// The figure this target draws into.
    fn figure(&self) -> FigureId;

    /// Wipe the axes. Artists created before this call are gone.
    fn clear(&mut self);

    /// Redraw the figure canvas.
    fn draw(&mut self);

    fn set_title(&mut self, text: &str);
    fn set_xlabel(&mut self, text: &str);
    fn set_ylabel(&mut self, text: &str);
    fn set_grid(&mut self, enabled: bool);
    fn set_xlim(&mut self, lo: f64, hi: f64);
    fn set_ylim(&mut self, lo: f64, hi: f64);

    /// Draw a line, returning a handle for later removal.
    fn plot_line(&mut self, xs: &[f64], ys: &[f64], style: &LineStyle) -> ArtistId;

    /// Remove a previously created artist. Unknown ids are ignored.
    fn remove_artist(&mut self, id: ArtistId);
}

/// One recorded target operation.
#[derive(Debug, Clone, PartialEq)]
pub enum TraceOp {
    Cleared,
    Drawn,
    Title(String),
    XLabel(String),
    YLabel(String),
    Grid(bool),
    XLim(f64, f64),
    YLim(f64, f64),
    Line { artist: ArtistId, points: usize, style: LineStyle },
    Removed(ArtistId),
}

/// Shared, clonable view on a [`TraceTarget`]'s recording.
#[derive(Debug, Clone, Default)]
pub struct TraceLog(Arc<Mutex<Vec<TraceOp>>>);

impl TraceLog {
    /// Snapshot of all recorded operations.
    pub fn ops(&self) -> Vec<TraceOp> {
        self.0.lock().unwrap().clone()
    }

    /// Number of canvas redraws so far.
    pub fn draw_count(&self) -> usize {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|op| matches!(op, TraceOp::Drawn))
            .count()
    }

    /// The most recent title, if one was set since the last clear.
    pub fn title(&self) -> Option<String> {
        let ops = self.0.lock().unwrap();
        for op in ops.iter().rev() {
            match op {
                TraceOp::Cleared => return None,
                TraceOp::Title(t) => return Some(t.clone()),
                _ => {}
            }
        }
        None
    }

    /// Artists currently alive (created and neither removed nor cleared).
    pub fn live_artists(&self) -> Vec<ArtistId> {
        let ops = self.0.lock().unwrap();
        let mut live = Vec::new();
        for op in ops.iter() {
            match op {
                TraceOp::Cleared => live.clear(),
                TraceOp::Line { artist, .. } => live.push(*artist),
                TraceOp::Removed(id) => live.retain(|a| a != id),
                _ => {}
            }
        }
        live
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }

    fn push(&self, op: TraceOp) {
        self.0.lock().unwrap().push(op);
    }
}

/// Recording render target.
#[derive(Debug)]
pub struct TraceTarget {
    figure: FigureId,
    log: TraceLog,
    next_artist: ArtistId,
}

impl TraceTarget {
    pub fn new(figure: FigureId) -> Self {
        Self {
            figure,
            log: TraceLog::default(),
            next_artist: 1,
        }
    }

    /// A handle on the recording, valid after the target has been moved
    /// into a plotter.
    pub fn log(&self) -> TraceLog {
        self.log.clone()
    }
}

impl RenderTarget for TraceTarget {
    fn figure(&self) -> FigureId {
        self.figure
    }

    fn clear(&mut self) {
        self.log.push(TraceOp::Cleared);
    }

    fn draw(&mut self) {
        self.log.push(TraceOp::Drawn);
    }

    fn set_title(&mut self, text: &str) {
        self.log.push(TraceOp::Title(text.to_string()));
    }

    fn set_xlabel(&mut self, text: &str) {
        self.log.push(TraceOp::XLabel(text.to_string()));
    }

    fn set_ylabel(&mut self, text: &str) {
        self.log.push(TraceOp::YLabel(text.to_string()));
    }

    fn set_grid(&mut self, enabled: bool) {
        self.log.push(TraceOp::Grid(enabled));
    }

    fn set_xlim(&mut self, lo: f64, hi: f64) {
        self.log.push(TraceOp::XLim(lo, hi));
    }

    fn set_ylim(&mut self, lo: f64, hi: f64) {
        self.log.push(TraceOp::YLim(lo, hi));
    }

    fn plot_line(&mut self, xs: &[f64], _ys: &[f64], style: &LineStyle) -> ArtistId {
        let artist = self.next_artist;
        self.next_artist += 1;
        self.log.push(TraceOp::Line {
            artist,
            points: xs.len(),
            style: style.clone(),
        });
        artist
    }

    fn remove_artist(&mut self, id: ArtistId) {
        self.log.push(TraceOp::Removed(id));
    }
}
