//! Voltammogram chart.
//!
//! Samples are split into traces by cycle and by sweep direction, each pair
//! drawn in its own colours, on a `ratatui` chart with the potential on the
//! x axis and the current on the y axis.

use crate::config::{PlotConfig, SweepConfig};
use crate::sample::{Sample, SampleSeries};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{self, EnterAlternateScreen, LeaveAlternateScreen};
use log::info;
use ratatui::backend::{Backend, CrosstermBackend};
use ratatui::layout::{Alignment, Constraint, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::symbols::Marker;
use ratatui::text::{Line, Span};
use ratatui::widgets::{
    Axis, Block, Borders, Chart, Dataset, GraphType, LegendPosition, Paragraph,
};
use ratatui::{Frame, Terminal};
use std::io::{self, Stdout};
use std::panic;
use std::time::Duration;

/// Redraw the live chart every this many samples.
pub const LIVE_REFRESH_EVERY: usize = 5;

/// Extra room around the sweep window on the potential axis, in millivolts.
const POTENTIAL_MARGIN: f64 = 100.0;

const TICKS: usize = 5;

const MAX_DECIMALS: f64 = 12.0;

/// Rising and falling colours, one pair per cycle. Repeats after the last.
const CYCLE_COLORS: [(Color, Color); 4] = [
    (Color::Blue, Color::Red),
    (Color::Green, Color::Magenta),
    (Color::Rgb(255, 165, 0), Color::Cyan),
    (Color::White, Color::LightMagenta),
];

const GRID_COLOR: Color = Color::DarkGray;

#[derive(Debug, thiserror::Error)]
pub enum PlotError {
    /// The terminal could not be initialised or drawn to.
    #[error("terminal backend failed: {0}")]
    Backend(#[from] io::Error),
}

/// Direction of the potential ramp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Rising,
    Falling,
}

/// Consecutive samples sharing a cycle and a direction.
#[derive(Debug, Clone, PartialEq)]
pub struct Trace {
    /// Zero-based cycle index.
    pub cycle: usize,
    pub direction: Direction,
    pub points: Vec<(f64, f64)>,
}

impl Trace {
    pub fn label(&self) -> String {
        let direction = match self.direction {
            Direction::Rising => "rising",
            Direction::Falling => "falling",
        };
        format!("Cycle {} {}", self.cycle + 1, direction)
    }

    pub fn color(&self) -> Color {
        let (rising, falling) = CYCLE_COLORS[self.cycle % CYCLE_COLORS.len()];
        match self.direction {
            Direction::Rising => rising,
            Direction::Falling => falling,
        }
    }
}

/// Split samples into traces.
///
/// A new cycle starts once the potential has come back to the starting
/// potential against the initial sweep direction. Adjacent traces share
/// their junction point so the drawn curve stays continuous.
pub fn segment_cycles(samples: &[Sample], sweep: &SweepConfig) -> Vec<Trace> {
    let start = f64::from(sweep.starting_potential_millivolts);
    let rising_first = sweep.starting_potential_millivolts <= sweep.ending_potential_millivolts;

    if let [only] = samples {
        return vec![Trace {
            cycle: 0,
            direction: if rising_first {
                Direction::Rising
            } else {
                Direction::Falling
            },
            points: vec![only.as_point()],
        }];
    }

    let mut traces: Vec<Trace> = Vec::new();
    let mut cycle = 0;
    let mut last_boundary: Option<usize> = None;

    for (i, pair) in samples.windows(2).enumerate() {
        let (prev, cur) = (pair[0].potential_millivolts, pair[1].potential_millivolts);

        let direction = if cur > prev {
            Direction::Rising
        } else if cur < prev {
            Direction::Falling
        } else {
            traces.last().map_or(Direction::Rising, |t| t.direction)
        };

        match traces.last_mut() {
            Some(trace) if trace.cycle == cycle && trace.direction == direction => {
                trace.points.push(pair[1].as_point());
            }
            _ => traces.push(Trace {
                cycle,
                direction,
                points: vec![pair[0].as_point(), pair[1].as_point()],
            }),
        }

        let returned = if rising_first {
            cur < prev && cur <= start
        } else {
            cur > prev && cur >= start
        };
        let index = i + 1;
        if returned && last_boundary.map_or(true, |b| index > b + 1) {
            cycle += 1;
            last_boundary = Some(index);
        }
    }

    traces
}

/// Potential axis window: the sweep window with a margin, widened to the data.
pub fn potential_bounds(samples: &SampleSeries, sweep: &SweepConfig) -> [f64; 2] {
    let a = f64::from(sweep.starting_potential_millivolts);
    let b = f64::from(sweep.ending_potential_millivolts);
    let lo = a.min(b) - POTENTIAL_MARGIN;
    let hi = a.max(b) + POTENTIAL_MARGIN;

    match samples.potential_range() {
        Some((min, max)) => [lo.min(min), hi.max(max)],
        None => [lo, hi],
    }
}

/// Current axis window: the data range with 10% padding.
pub fn current_bounds(samples: &SampleSeries) -> [f64; 2] {
    match samples.current_range() {
        None => [-1.0, 1.0],
        Some((min, max)) if max - min < f64::EPSILON => [min - 1.0, max + 1.0],
        Some((min, max)) => {
            // Scaled before subtracting so a range spanning most of f64 stays finite.
            let pad = max * 0.1 - min * 0.1;
            [min - pad, max + pad]
        }
    }
}

/// Evenly spaced values from `bounds[0]` to `bounds[1]`, both included.
pub fn ticks(bounds: [f64; 2]) -> Vec<f64> {
    let last = (TICKS - 1) as f64;
    (0..TICKS)
        .map(|i| {
            let t = i as f64 / last;
            bounds[0] * (1.0 - t) + bounds[1] * t
        })
        .collect()
}

/// Line segments through the inner ticks of both axes.
pub fn grid_lines(x: [f64; 2], y: [f64; 2]) -> Vec<[(f64, f64); 2]> {
    let xs = ticks(x);
    let ys = ticks(y);
    let inner = 1..TICKS - 1;

    let vertical = xs[inner.clone()].iter().map(|&gx| [(gx, y[0]), (gx, y[1])]);
    let horizontal = ys[inner].iter().map(|&gy| [(x[0], gy), (x[1], gy)]);
    vertical.chain(horizontal).collect()
}

/// Enough decimals to tell neighbouring ticks apart.
fn tick_decimals(bounds: [f64; 2]) -> usize {
    let last = (TICKS - 1) as f64;
    let step = (bounds[1] / last - bounds[0] / last).abs();
    if !step.is_normal() {
        return 0;
    }
    (-step.log10()).ceil().clamp(0.0, MAX_DECIMALS) as usize
}

fn tick_labels(bounds: [f64; 2]) -> Vec<Span<'static>> {
    let decimals = tick_decimals(bounds);
    ticks(bounds)
        .into_iter()
        .map(|v| Span::raw(format!("{:.*}", decimals, v)))
        .collect()
}

/// Draw header, chart, and footer into `area`.
pub fn render(
    frame: &mut Frame,
    area: Rect,
    plot: &PlotConfig,
    sweep: &SweepConfig,
    samples: &SampleSeries,
    footer: &str,
) {
    let areas = Layout::vertical([
        Constraint::Length(2),
        Constraint::Min(3),
        Constraint::Length(1),
    ])
    .split(area);

    let header = Paragraph::new(vec![
        Line::from(Span::styled(
            plot.title.as_str(),
            Style::default().add_modifier(Modifier::BOLD),
        )),
        Line::from(Span::styled(
            plot.subtitle.as_str(),
            Style::default().fg(Color::Gray),
        )),
    ])
    .alignment(Alignment::Center);
    frame.render_widget(header, areas[0]);

    let x_bounds = potential_bounds(samples, sweep);
    let y_bounds = current_bounds(samples);
    let traces = segment_cycles(samples.as_slice(), sweep);
    let grid = if plot.grid_visible {
        grid_lines(x_bounds, y_bounds)
    } else {
        Vec::new()
    };

    // Grid first so the data is drawn over it.
    let mut datasets: Vec<Dataset> = grid
        .iter()
        .map(|line| {
            Dataset::default()
                .marker(Marker::Dot)
                .graph_type(GraphType::Line)
                .style(Style::default().fg(GRID_COLOR))
                .data(line)
        })
        .collect();

    let mut labelled: Vec<(usize, Direction)> = Vec::new();
    for trace in &traces {
        let mut dataset = Dataset::default()
            .marker(Marker::Braille)
            .graph_type(GraphType::Line)
            .style(Style::default().fg(trace.color()))
            .data(&trace.points);
        let key = (trace.cycle, trace.direction);
        if !labelled.contains(&key) {
            labelled.push(key);
            dataset = dataset.name(trace.label());
        }
        datasets.push(dataset);
    }

    let axis_style = Style::default().fg(Color::Gray);
    let chart = Chart::new(datasets)
        .block(Block::default().borders(Borders::ALL))
        .x_axis(
            Axis::default()
                .title("Potential (mV)")
                .style(axis_style)
                .bounds(x_bounds)
                .labels(tick_labels(x_bounds)),
        )
        .y_axis(
            Axis::default()
                .title("Current (uA)")
                .style(axis_style)
                .bounds(y_bounds)
                .labels(tick_labels(y_bounds)),
        )
        .legend_position(Some(LegendPosition::TopRight))
        .hidden_legend_constraints((Constraint::Ratio(1, 2), Constraint::Ratio(1, 2)));
    frame.render_widget(chart, areas[1]);

    let footer = Paragraph::new(footer).style(Style::default().fg(Color::DarkGray));
    frame.render_widget(footer, areas[2]);
}

/// Chart bound to a terminal backend.
pub struct Plotter<B: Backend> {
    terminal: Terminal<B>,
    plot: PlotConfig,
    sweep: SweepConfig,
    reported_cycles: usize,
}

impl<B: Backend> Plotter<B> {
    pub fn new(backend: B, plot: &PlotConfig, sweep: &SweepConfig) -> Result<Self, PlotError> {
        let mut terminal = Terminal::new(backend)?;
        terminal.clear()?;
        Ok(Self {
            terminal,
            plot: plot.clone(),
            sweep: sweep.clone(),
            reported_cycles: 0,
        })
    }

    /// Draw the whole screen. An empty series gives an empty chart.
    pub fn draw(&mut self, samples: &SampleSeries, footer: &str) -> Result<(), PlotError> {
        let cycles = segment_cycles(samples.as_slice(), &self.sweep)
            .last()
            .map_or(0, |t| t.cycle + 1);
        if cycles > CYCLE_COLORS.len() && self.reported_cycles <= CYCLE_COLORS.len() {
            info!(
                "{} cycles detected but only {} colour pairs, colours will repeat",
                cycles,
                CYCLE_COLORS.len()
            );
        }
        self.reported_cycles = self.reported_cycles.max(cycles);

        let plot = &self.plot;
        let sweep = &self.sweep;
        self.terminal.draw(|frame| {
            let area = frame.size();
            render(frame, area, plot, sweep, samples, footer);
        })?;
        Ok(())
    }

    pub fn backend(&self) -> &B {
        self.terminal.backend()
    }
}

/// Full-screen chart on the terminal's alternate screen.
///
/// The terminal is restored when this is dropped or when the process panics.
pub struct TerminalPlotter {
    plotter: Plotter<CrosstermBackend<Stdout>>,
}

impl TerminalPlotter {
    pub fn start(plot: &PlotConfig, sweep: &SweepConfig) -> Result<Self, PlotError> {
        terminal::enable_raw_mode()?;
        if let Err(e) = execute!(io::stdout(), EnterAlternateScreen) {
            let _ = restore();
            return Err(e.into());
        }

        let panic_hook = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let _ = restore();
            panic_hook(info);
        }));

        let plotter = match Plotter::new(CrosstermBackend::new(io::stdout()), plot, sweep) {
            Ok(plotter) => plotter,
            Err(e) => {
                let _ = restore();
                return Err(e);
            }
        };
        Ok(Self { plotter })
    }

    /// Drain pending key presses and report whether one asked to quit.
    ///
    /// Raw mode swallows the terminal's interrupt, so the sweep loop calls
    /// this to stay interruptible.
    pub fn quit_requested(&mut self) -> Result<bool, PlotError> {
        let mut quit = false;
        while event::poll(Duration::ZERO)? {
            if let Event::Key(key) = event::read()? {
                quit |= is_quit_key(&key);
            }
        }
        Ok(quit)
    }

    /// Redraw while the sweep is running.
    pub fn draw_live(&mut self, samples: &SampleSeries) -> Result<(), PlotError> {
        let footer = format!("acquiring | {} samples", samples.len());
        self.plotter.draw(samples, &footer)
    }

    /// Show the final chart until the user presses `q`, `Esc`, or Ctrl-C.
    pub fn show(mut self, samples: &SampleSeries, status: &str) -> Result<(), PlotError> {
        let footer = format!(
            "{} | {} samples | (q) or (Esc) quit",
            status,
            samples.len()
        );

        loop {
            self.plotter.draw(samples, &footer)?;

            if !event::poll(Duration::from_millis(250))? {
                continue;
            }
            if let Event::Key(key) = event::read()? {
                if is_quit_key(&key) {
                    break;
                }
            }
        }
        Ok(())
    }
}

impl Drop for TerminalPlotter {
    fn drop(&mut self) {
        let _ = self.plotter.terminal.show_cursor();
        let _ = restore();
    }
}

/// `q`, `Esc` or Ctrl-C.
pub fn is_quit_key(key: &KeyEvent) -> bool {
    if key.kind != KeyEventKind::Press {
        return false;
    }
    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => true,
        KeyCode::Char('c') => key.modifiers.contains(KeyModifiers::CONTROL),
        _ => false,
    }
}

fn restore() -> io::Result<()> {
    terminal::disable_raw_mode()?;
    execute!(io::stdout(), LeaveAlternateScreen)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratatui::backend::TestBackend;

    fn sweep(start: i32, end: i32) -> SweepConfig {
        SweepConfig {
            starting_potential_millivolts: start,
            ending_potential_millivolts: end,
            ..SweepConfig::default()
        }
    }

    /// Triangle wave between `start` and `end` for `cycles` cycles.
    fn triangle(start: i32, end: i32, step: i32, cycles: usize) -> Vec<Sample> {
        let step = if end >= start { step.abs() } else { -step.abs() };
        let mut potentials = vec![start];
        for _ in 0..cycles {
            let mut v = start;
            while v != end {
                v += step;
                potentials.push(v);
            }
            while v != start {
                v -= step;
                potentials.push(v);
            }
        }
        potentials
            .into_iter()
            .map(|v| Sample::new(f64::from(v), f64::from(v) / 100.0))
            .collect()
    }

    fn screen(plotter: &Plotter<TestBackend>) -> String {
        plotter
            .backend()
            .buffer()
            .content
            .iter()
            .map(|cell| cell.symbol())
            .collect()
    }

    #[test]
    fn two_cycles_give_four_traces() {
        let samples = triangle(-500, 500, 100, 2);
        assert_eq!(samples.len(), 41);

        let traces = segment_cycles(&samples, &sweep(-500, 500));
        let keys: Vec<(usize, Direction)> = traces.iter().map(|t| (t.cycle, t.direction)).collect();
        assert_eq!(
            keys,
            vec![
                (0, Direction::Rising),
                (0, Direction::Falling),
                (1, Direction::Rising),
                (1, Direction::Falling),
            ]
        );
        assert!(traces.iter().all(|t| t.points.len() == 11));
        // Adjacent traces meet at the turning point.
        assert_eq!(traces[0].points.last(), traces[1].points.first());
    }

    #[test]
    fn descending_sweep_counts_cycles_on_return() {
        let samples = triangle(500, -500, 100, 3);
        let traces = segment_cycles(&samples, &sweep(500, -500));

        assert_eq!(traces.len(), 6);
        assert_eq!(traces[0].direction, Direction::Falling);
        assert_eq!(traces[5].cycle, 2);
        assert_eq!(traces[5].direction, Direction::Rising);
    }

    #[test]
    fn flat_potential_keeps_direction() {
        let samples = vec![
            Sample::new(0.0, 0.0),
            Sample::new(10.0, 0.0),
            Sample::new(10.0, 1.0),
            Sample::new(20.0, 2.0),
        ];
        let traces = segment_cycles(&samples, &sweep(0, 100));
        assert_eq!(traces.len(), 1);
        assert_eq!(traces[0].points.len(), 4);
    }

    #[test]
    fn single_and_empty_series() {
        assert!(segment_cycles(&[], &sweep(-500, 500)).is_empty());
        let traces = segment_cycles(&[Sample::new(1.0, 2.0)], &sweep(-500, 500));
        assert_eq!(traces.len(), 1);
        assert_eq!(traces[0].points, vec![(1.0, 2.0)]);
    }

    #[test]
    fn colours_repeat_after_four_cycles() {
        let first = Trace {
            cycle: 0,
            direction: Direction::Rising,
            points: Vec::new(),
        };
        let fifth = Trace { cycle: 4, ..first.clone() };
        assert_eq!(first.color(), fifth.color());
        assert_eq!(fifth.label(), "Cycle 5 rising");
    }

    #[test]
    fn bounds_of_empty_series() {
        let samples = SampleSeries::new();
        assert_eq!(potential_bounds(&samples, &sweep(-500, 500)), [-600.0, 600.0]);
        assert_eq!(potential_bounds(&samples, &sweep(500, -200)), [-300.0, 600.0]);
        assert_eq!(current_bounds(&samples), [-1.0, 1.0]);
    }

    #[test]
    fn bounds_widen_to_data() {
        let samples: SampleSeries = vec![Sample::new(-800.0, 2.0), Sample::new(0.0, 12.0)]
            .into_iter()
            .collect();
        assert_eq!(potential_bounds(&samples, &sweep(-500, 500)), [-800.0, 600.0]);
        assert_eq!(current_bounds(&samples), [1.0, 13.0]);

        let flat: SampleSeries = vec![Sample::new(0.0, 3.0)].into_iter().collect();
        assert_eq!(current_bounds(&flat), [2.0, 4.0]);
    }

    #[test]
    fn bounds_stay_finite_for_extreme_currents() {
        let samples: SampleSeries = vec![Sample::new(0.0, -1e308), Sample::new(1.0, 1e308)]
            .into_iter()
            .collect();
        let bounds = current_bounds(&samples);
        assert!(bounds.iter().all(|b| b.is_finite()));
        assert!(bounds[0] < -1e308 && bounds[1] > 1e308);
        assert!(ticks(bounds).iter().all(|t| t.is_finite()));
    }

    #[test]
    fn tick_labels_resolve_sub_microamp_currents() {
        let labels: Vec<String> = tick_labels([0.0, 0.0008])
            .into_iter()
            .map(|s| s.content.into_owned())
            .collect();
        assert_eq!(labels, vec!["0.0000", "0.0002", "0.0004", "0.0006", "0.0008"]);

        let labels: Vec<String> = tick_labels([-600.0, 600.0])
            .into_iter()
            .map(|s| s.content.into_owned())
            .collect();
        assert_eq!(labels, vec!["-600", "-300", "0", "300", "600"]);
    }

    #[test]
    fn quit_keys() {
        let press = |code, modifiers| KeyEvent::new(code, modifiers);
        assert!(is_quit_key(&press(KeyCode::Char('q'), KeyModifiers::NONE)));
        assert!(is_quit_key(&press(KeyCode::Esc, KeyModifiers::NONE)));
        assert!(is_quit_key(&press(KeyCode::Char('c'), KeyModifiers::CONTROL)));
        assert!(!is_quit_key(&press(KeyCode::Char('c'), KeyModifiers::NONE)));
        assert!(!is_quit_key(&press(KeyCode::Enter, KeyModifiers::NONE)));

        let mut release = press(KeyCode::Char('q'), KeyModifiers::NONE);
        release.kind = KeyEventKind::Release;
        assert!(!is_quit_key(&release));
    }

    #[test]
    fn grid_has_inner_lines_on_both_axes() {
        let lines = grid_lines([0.0, 400.0], [-2.0, 2.0]);
        assert_eq!(lines.len(), 2 * (TICKS - 2));
        assert_eq!(lines[0], [(100.0, -2.0), (100.0, 2.0)]);
        assert_eq!(lines[TICKS - 2], [(0.0, -1.0), (400.0, -1.0)]);
    }

    #[test]
    fn renders_empty_series() {
        let plot = PlotConfig {
            title: String::from("Blank run"),
            subtitle: String::from("no samples"),
            grid_visible: true,
        };
        let mut plotter = Plotter::new(TestBackend::new(80, 24), &plot, &sweep(-500, 500)).unwrap();

        plotter.draw(&SampleSeries::new(), "done").unwrap();

        let text = screen(&plotter);
        assert!(text.contains("Blank run"));
        assert!(text.contains("no samples"));
        assert!(text.contains("Potential (mV)"));
    }

    #[test]
    fn renders_legend_per_cycle_and_direction() {
        let plot = PlotConfig {
            title: String::from("Ferrocyanide"),
            subtitle: String::new(),
            grid_visible: false,
        };
        let samples: SampleSeries = triangle(-500, 500, 50, 2).into_iter().collect();
        let mut plotter =
            Plotter::new(TestBackend::new(120, 40), &plot, &sweep(-500, 500)).unwrap();

        plotter.draw(&samples, "complete").unwrap();

        let text = screen(&plotter);
        assert!(text.contains("Ferrocyanide"));
        assert!(text.contains("Cycle 1 rising"));
        assert!(text.contains("Cycle 2 falling"));
        assert!(text.contains("complete"));
    }
}
