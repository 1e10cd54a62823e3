//! Progress reporting for long-running sweeps.
//!
//! Multi-hour instrument sweeps run headless in lab notebooks, so
//! progress goes two places: the console, and a small self-refreshing
//! HTML page that any machine on the lab network can watch through a
//! static file server.

use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local};
use sysinfo::{System, SystemExt};

use crate::paths;

/// Timestamp style used on the monitor page.
const TIME_FORMAT: &str = "%a, %d %b %Y %H:%M:%S";
/// Page name used when no explicit file is given.
const DEFAULT_PAGE: &str = "sweep.html";
/// Browser refresh period for a running sweep, in seconds.
const REFRESH_SECONDS: u32 = 5;

/// Prints `msg` and stays on the line, for "Sweeping... done" flows.
pub fn print_wait(msg: &str) {
    print!("{}... ", msg);
    let _ = io::stdout().flush();
}

/// Rewrites the current console line with `msg`, for updating an
/// iterating value without scrolling the output.
pub fn print_progress(msg: &str) {
    print!("\r");
    let _ = io::stdout().flush();
    println!("{}", msg);
}

/// URL where the monitor page is served, if the project has a file
/// server configured. The port comes from the project's
/// `.monitorhostport` file and reads as `null` when absent.
pub fn monitor_url() -> String {
    let host = System::new()
        .host_name()
        .unwrap_or_else(|| "localhost".to_string());
    let port = match paths::monitor_host_port() {
        Some(p) => p.to_string(),
        None => "null".to_string(),
    };
    format!("http://{}:{}", host.to_lowercase(), port)
}

/// Reports progress through a multi-dimensional sweep.
///
/// The sweep is described by the number of points per dimension; each
/// [`update`] advances the innermost dimension first, like an odometer.
/// Once every point is visited the sweep is complete and further
/// updates are an error.
///
/// ```ignore
/// let mut progress = SweepProgress::new("laser LIV", &[2, 100])?
///     .with_stdout(true)
///     .start()?;
/// for _temperature in temps {
///     for _bias in biases {
///         // measure...
///         progress.update()?;
///     }
/// }
/// ```
///
/// [`update`]: SweepProgress::update
pub struct SweepProgress {
    name: String,
    size: Vec<usize>,
    current: Vec<usize>,
    total: usize,
    done: usize,
    completed: bool,
    html: bool,
    stdout: bool,
    file_path: Option<PathBuf>,
    started: bool,
    start_wall: DateTime<Local>,
    start: Instant,
}

impl SweepProgress {
    /// Describes a sweep over the given dimension sizes.
    ///
    /// Args:
    ///     name: sweep title shown on the monitor page
    ///     sweep_size: number of points in each dimension, outermost first
    pub fn new<S: Into<String>>(name: S, sweep_size: &[usize]) -> Result<Self> {
        if sweep_size.is_empty() {
            bail!("a sweep needs at least one dimension");
        }
        if sweep_size.contains(&0) {
            bail!("sweep dimensions must all be non-zero: {:?}", sweep_size);
        }
        Ok(SweepProgress {
            name: name.into(),
            size: sweep_size.to_vec(),
            current: vec![0; sweep_size.len()],
            total: sweep_size.iter().product(),
            done: 0,
            completed: false,
            html: true,
            stdout: false,
            file_path: None,
            started: false,
            start_wall: Local::now(),
            start: Instant::now(),
        })
    }

    /// Turns the HTML monitor page on or off (on by default).
    pub fn with_html(mut self, enabled: bool) -> Self {
        self.html = enabled;
        self
    }

    /// Turns per-update console lines on or off (off by default).
    pub fn with_stdout(mut self, enabled: bool) -> Self {
        self.stdout = enabled;
        self
    }

    /// Writes the monitor page to an explicit file instead of
    /// `sweep.html` under [`paths::monitor_dir`]. Implies HTML output.
    pub fn with_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.file_path = Some(path.into());
        self.html = true;
        self
    }

    /// Starts the clock, announces the monitor URL, and renders the
    /// initial state.
    pub fn start(mut self) -> Result<Self> {
        if self.html {
            let path = match self.file_path.take() {
                Some(p) => p,
                None => paths::monitor_dir().join(DEFAULT_PAGE),
            };
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create monitor directory {}", parent.display())
                })?;
            }
            self.file_path = Some(path);
            println!("See sweep progress online at");
            println!("{}", monitor_url());
        }
        if self.stdout {
            println!("{}", self.name);
            let mut legend = String::new();
            for i in 0..self.size.len() {
                legend.push_str(&format!("Dim-{}...", i));
            }
            println!("{}", legend);
        }
        self.start_wall = Local::now();
        self.start = Instant::now();
        self.started = true;
        if self.html {
            self.write_html_running()?;
        }
        if self.stdout {
            self.print_stdout_line();
        }
        Ok(self)
    }

    /// Marks one sweep point done.
    pub fn update(&mut self) -> Result<()> {
        self.update_steps(1)
    }

    /// Marks several sweep points done at once.
    pub fn update_steps(&mut self, steps: usize) -> Result<()> {
        if !self.started {
            bail!("this sweep was never started; call start() before update()");
        }
        if self.completed {
            bail!("this sweep has already completed; make a new one to go again");
        }
        for _ in 0..steps {
            if self.completed {
                break;
            }
            self.advance_one();
        }
        if self.completed {
            if self.html {
                self.write_html_completed()?;
            }
            if self.stdout {
                println!("Sweep completed!");
            }
        } else {
            if self.html {
                self.write_html_running()?;
            }
            if self.stdout {
                self.print_stdout_line();
            }
        }
        Ok(())
    }

    /// Current odometer reading, zero-based, outermost dimension first.
    pub fn position(&self) -> &[usize] {
        &self.current
    }

    pub fn points_done(&self) -> usize {
        self.done
    }

    pub fn total_points(&self) -> usize {
        self.total
    }

    pub fn completed(&self) -> bool {
        self.completed
    }

    fn advance_one(&mut self) {
        // Innermost dimension counts fastest.
        for i in (0..self.size.len()).rev() {
            if self.current[i] + 1 < self.size[i] {
                self.current[i] += 1;
                break;
            }
            self.current[i] = 0;
        }
        self.done += 1;
        if self.done >= self.total {
            self.completed = true;
        }
    }

    /// Projects the finish time by scaling elapsed time with the
    /// fraction of points visited.
    fn expected_completion(&self) -> DateTime<Local> {
        let complete_ratio = (self.done + 1) as f64 / self.total as f64;
        let projected_secs = self.start.elapsed().as_secs_f64() / complete_ratio;
        let projected = chrono::Duration::milliseconds((projected_secs * 1000.0) as i64);
        self.start_wall
            .checked_add_signed(projected)
            .unwrap_or(self.start_wall)
    }

    fn print_stdout_line(&self) {
        let mut line = String::new();
        for (i, &p) in self.current.iter().enumerate() {
            line.push_str(&format!("{}/{}...", p + 1, self.size[i]));
        }
        println!("{}", line);
    }

    fn write_html_running(&self) -> Result<()> {
        let path = match &self.file_path {
            Some(p) => p,
            None => return Ok(()),
        };
        let mut body = String::new();
        for (i, &p) in self.current.iter().enumerate() {
            body.push_str(&ptag(&format!(
                "{}dimension[{}] : {} of {}",
                "sub-".repeat(i),
                i,
                p + 1,
                self.size[i]
            )));
        }
        body.push_str("<hr />\n");
        body.push_str(&ptag(&format!(
            "(Start Time)           {}",
            self.start_wall.format(TIME_FORMAT)
        )));
        body.push_str(&ptag(&format!(
            "(Latest Update)        {}",
            Local::now().format(TIME_FORMAT)
        )));
        body.push_str(&ptag(&format!(
            "(Expected Completion)  {}",
            self.expected_completion().format(TIME_FORMAT)
        )));
        body.push_str(&ptag("This monitor service is hosted in the directory:"));
        let hosted_in = path.parent().unwrap_or(path).display().to_string();
        body.push_str(&ptag(&hosted_in));
        fs::write(path, html_document(&self.name, &body, true))
            .with_context(|| format!("Failed to write monitor page {}", path.display()))
    }

    fn write_html_completed(&self) -> Result<()> {
        let path = match &self.file_path {
            Some(p) => p,
            None => return Ok(()),
        };
        let mut body = String::from("<h2>Sweep completed!</h2>\n");
        body.push_str(&ptag(&format!(
            "At {}",
            Local::now().format(TIME_FORMAT)
        )));
        // No autorefresh: the final page should sit still.
        fs::write(path, html_document(&self.name, &body, false))
            .with_context(|| format!("Failed to write monitor page {}", path.display()))
    }
}

fn ptag(line: &str) -> String {
    format!("<p>{}</p>\n", line)
}

fn html_document(title: &str, body: &str, autorefresh: bool) -> String {
    let mut doc = String::new();
    doc.push_str("<!DOCTYPE html>\n<html>\n<head>\n");
    doc.push_str("<title>Sweep Progress Monitor</title>\n");
    if autorefresh {
        doc.push_str(&format!(
            "<meta http-equiv=\"refresh\" content=\"{}\" />\n",
            REFRESH_SECONDS
        ));
    }
    doc.push_str("</head>\n<body>\n");
    doc.push_str(&format!("<h1>{}</h1>\n<hr />\n", title));
    doc.push_str(body);
    doc.push_str("</body>\n</html>\n");
    doc
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::tempdir;

    fn quiet_sweep(dir: &std::path::Path, sizes: &[usize]) -> SweepProgress {
        SweepProgress::new("test sweep", sizes)
            .unwrap()
            .with_file(dir.join("monitor.html"))
            .start()
            .unwrap()
    }

    #[test]
    fn test_odometer_order() {
        let dir = tempdir().unwrap();
        let mut progress = quiet_sweep(dir.path(), &[2, 3]);

        assert_eq!(progress.position(), &[0, 0]);
        progress.update().unwrap();
        assert_eq!(progress.position(), &[0, 1]);
        progress.update().unwrap();
        assert_eq!(progress.position(), &[0, 2]);
        progress.update().unwrap();
        assert_eq!(progress.position(), &[1, 0]);
        assert_eq!(progress.points_done(), 3);
        assert!(!progress.completed());
    }

    #[test]
    fn test_completes_after_every_point() {
        let dir = tempdir().unwrap();
        let mut progress = quiet_sweep(dir.path(), &[2, 3]);

        for _ in 0..6 {
            assert!(!progress.completed());
            progress.update().unwrap();
        }
        assert!(progress.completed());

        let err = progress.update().unwrap_err();
        assert!(err.to_string().contains("completed"));
    }

    #[test]
    fn test_single_dimension_sweep() {
        let dir = tempdir().unwrap();
        let mut progress = quiet_sweep(dir.path(), &[4]);

        progress.update_steps(3).unwrap();
        assert_eq!(progress.position(), &[3]);
        progress.update().unwrap();
        assert!(progress.completed());
    }

    #[test]
    fn test_update_steps_overshoot_just_completes() {
        let dir = tempdir().unwrap();
        let mut progress = quiet_sweep(dir.path(), &[2, 3]);

        progress.update_steps(100).unwrap();
        assert!(progress.completed());
        assert_eq!(progress.points_done(), 6);
    }

    #[test]
    fn test_update_requires_start() {
        let mut progress = SweepProgress::new("unstarted", &[3]).unwrap();
        let err = progress.update().unwrap_err();
        assert!(err.to_string().contains("start()"));
    }

    #[test]
    fn test_bad_dimensions_rejected() {
        assert!(SweepProgress::new("empty", &[]).is_err());
        assert!(SweepProgress::new("zero", &[2, 0]).is_err());
    }

    #[test]
    fn test_monitor_page_lifecycle() {
        let dir = tempdir().unwrap();
        let page = dir.path().join("monitor.html");
        let mut progress = SweepProgress::new("LIV curve", &[2, 2])
            .unwrap()
            .with_file(&page)
            .start()
            .unwrap();

        let html = fs::read_to_string(&page).unwrap();
        assert!(html.contains("Sweep Progress Monitor"));
        assert!(html.contains("LIV curve"));
        assert!(html.contains("dimension[0] : 1 of 2"));
        assert!(html.contains("sub-dimension[1] : 1 of 2"));
        assert!(html.contains("refresh"));
        assert!(html.contains("Expected Completion"));

        progress.update_steps(4).unwrap();
        let html = fs::read_to_string(&page).unwrap();
        assert!(html.contains("Sweep completed!"));
        assert!(!html.contains("refresh"));
    }

    #[test]
    #[serial]
    fn test_monitor_url_reads_project_port() {
        let dir = tempdir().unwrap();
        paths::set_project_dir(dir.path());

        let url = monitor_url();
        assert!(url.starts_with("http://"));
        assert!(url.ends_with(":null"));

        fs::write(dir.path().join(".monitorhostport"), "8050\n").unwrap();
        assert!(monitor_url().ends_with(":8050"));
    }
}
