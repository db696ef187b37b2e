//! Per-container progress bar.
//!
//! A thin layer over [`indicatif::ProgressBar`] fed with explicit [`Frame`]s
//! by the PageIO coordinator.  Each container gets a fresh bar; [`finish`]
//! leaves the final state on screen so later output starts on a new line.
//!
//! [`finish`]: ProgressRenderer::finish

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

const TEMPLATE: &str = "{prefix} {spinner} [{bar:30}] {pos}/{len} ({percent:>3}%)";

/// One snapshot of a container transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    /// 1-based container index.
    pub container:  usize,
    pub containers: usize,
    /// Records transferred so far.
    pub done:       usize,
    /// Records in this container.
    pub total:      usize,
}

impl Frame {
    pub fn percent(&self) -> usize {
        if self.total == 0 { 100 } else { self.done.min(self.total) * 100 / self.total }
    }
}

type TargetFactory = Box<dyn Fn() -> ProgressDrawTarget + Send>;

pub struct ProgressRenderer {
    target:   TargetFactory,
    bar:      Option<ProgressBar>,
    finished: Option<Frame>,
}

impl ProgressRenderer {
    pub fn stderr() -> Self {
        Self::with_target(Box::new(ProgressDrawTarget::stderr))
    }

    /// A renderer that draws nothing.
    pub fn hidden() -> Self {
        Self::with_target(Box::new(ProgressDrawTarget::hidden))
    }

    /// Draw onto a caller-supplied terminal, e.g. an in-memory one.
    pub fn to_term<T: indicatif::TermLike + Clone + 'static>(term: T) -> Self {
        Self::with_target(Box::new(move || ProgressDrawTarget::term_like(Box::new(term.clone()))))
    }

    pub fn for_terminal(show: bool) -> Self {
        if show { Self::stderr() } else { Self::hidden() }
    }

    fn with_target(target: TargetFactory) -> Self {
        Self { target, bar: None, finished: None }
    }

    /// Update the bar to `frame`, starting a new bar for a new container.
    pub fn render(&mut self, frame: &Frame) {
        let target = &self.target;
        let bar = self.bar.get_or_insert_with(|| new_bar(target()));
        apply(bar, frame);
        bar.tick();
    }

    /// Draw the final state of `frame` and leave it on screen.
    pub fn finish(&mut self, frame: &Frame) {
        let bar = match self.bar.take() {
            Some(bar) => bar,
            None      => new_bar((self.target)()),
        };
        apply(&bar, frame);
        bar.finish();
        self.finished = Some(*frame);
    }

    /// The frame most recently passed to [`finish`](Self::finish).
    pub fn last_finished(&self) -> Option<Frame> {
        self.finished
    }
}

fn new_bar(target: ProgressDrawTarget) -> ProgressBar {
    let style = ProgressStyle::with_template(TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
    ProgressBar::with_draw_target(None, target).with_style(style)
}

fn apply(bar: &ProgressBar, frame: &Frame) {
    bar.set_prefix(format!("{}/{}", frame.container, frame.containers));
    bar.set_length(frame.total as u64);
    bar.set_position(frame.done.min(frame.total) as u64);
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use indicatif::TermLike;
    use std::io;
    use std::sync::{Arc, Mutex};

    /// In-memory terminal recording everything drawn on it.
    #[derive(Debug, Clone, Default)]
    pub(crate) struct CaptureTerm(Arc<Mutex<String>>);

    impl CaptureTerm {
        pub(crate) fn text(&self) -> String {
            self.0.lock().unwrap().clone()
        }
    }

    impl TermLike for CaptureTerm {
        fn width(&self) -> u16 { 200 }
        fn move_cursor_up(&self, _n: usize) -> io::Result<()> { Ok(()) }
        fn move_cursor_down(&self, _n: usize) -> io::Result<()> { Ok(()) }
        fn move_cursor_right(&self, _n: usize) -> io::Result<()> { Ok(()) }
        fn move_cursor_left(&self, _n: usize) -> io::Result<()> { Ok(()) }
        fn write_line(&self, s: &str) -> io::Result<()> {
            let mut out = self.0.lock().unwrap();
            out.push_str(s);
            out.push('\n');
            Ok(())
        }
        fn write_str(&self, s: &str) -> io::Result<()> {
            self.0.lock().unwrap().push_str(s);
            Ok(())
        }
        fn clear_line(&self) -> io::Result<()> { Ok(()) }
        fn flush(&self) -> io::Result<()> { Ok(()) }
    }

    #[test]
    fn finish_draws_final_frame() {
        let term = CaptureTerm::default();
        let mut renderer = ProgressRenderer::to_term(term.clone());
        let mut frame = Frame { container: 2, containers: 3, done: 0, total: 10 };
        renderer.render(&frame);
        frame.done = 5;
        renderer.render(&frame);
        frame.done = 10;
        renderer.finish(&frame);

        let text = term.text();
        assert!(text.contains("2/3"));
        assert!(text.contains("10/10 (100%)"));
        assert_eq!(renderer.last_finished(), Some(frame));
    }

    #[test]
    fn each_container_gets_its_own_bar() {
        let term = CaptureTerm::default();
        let mut renderer = ProgressRenderer::to_term(term.clone());
        renderer.finish(&Frame { container: 1, containers: 2, done: 4, total: 4 });
        renderer.render(&Frame { container: 2, containers: 2, done: 0, total: 7 });
        renderer.finish(&Frame { container: 2, containers: 2, done: 7, total: 7 });

        let text = term.text();
        assert!(text.contains("4/4 (100%)"));
        assert!(text.contains("7/7 (100%)"));
    }

    #[test]
    fn empty_container_is_complete() {
        let frame = Frame { container: 1, containers: 1, done: 0, total: 0 };
        assert_eq!(frame.percent(), 100);
    }

    #[test]
    fn hidden_renderer_still_tracks_frames() {
        let mut renderer = ProgressRenderer::hidden();
        renderer.render(&Frame { container: 1, containers: 1, done: 1, total: 2 });
        let last = Frame { container: 1, containers: 1, done: 2, total: 2 };
        renderer.finish(&last);
        assert_eq!(renderer.last_finished(), Some(last));
    }
}
