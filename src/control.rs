// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! The main control loop.
//!
//! Waits on key gestures from the sampler and on its own timers: the fan is
//! re-evaluated every `fan.interval` seconds and, with `slider.auto`, the slider
//! advances every `slider.time` seconds. Pages are drawn by a [`Renderer`] task,
//! so a slow lookup never holds up the fan or shutdown.

use crate::board::{self, DutyOutput};
use crate::button::ButtonEvent;
use crate::command;
use crate::config::{Config, KeyAction};
use crate::coord::{EventReceiver, SharedState, Shutdown};
use crate::display::{self, Page, Renderer};
use crate::fan::{FanController, STOPPED_DUTY};
use std::sync::Arc;
use tokio::time::{self, Duration, Instant, MissedTickBehavior};

pub struct Controller<P> {
    config: Config,
    shared: Arc<SharedState>,
    pages: Vec<Page>,
    renderer: Renderer,
    fan: FanController<P>,
    temp_failing: bool,
}

impl<P: DutyOutput> Controller<P> {
    pub fn new(
        config: &Config,
        shared: Arc<SharedState>,
        renderer: Renderer,
        fan: FanController<P>,
    ) -> Self {
        Self {
            pages: display::pages(config),
            config: config.clone(),
            shared,
            renderer,
            fan,
            temp_failing: false,
        }
    }

    pub fn current_page(&self) -> Page {
        self.pages[self.shared.page(self.pages.len())]
    }

    /// Ask the renderer to redraw the current page.
    pub fn render(&self) {
        self.renderer.request(self.current_page());
    }

    /// Move to the next page and show it.
    pub fn advance_slider(&mut self) {
        self.shared.advance_page(self.pages.len());
        self.render();
    }

    /// Re-evaluate the fan. Returns the duty cycle applied, or `None` when the
    /// temperature couldn't be read and the cycle was skipped.
    pub fn update_fan(&mut self) -> Option<f64> {
        let running = self.shared.running();
        match board::read_temperature(&self.config.board.thermal_path) {
            Ok(temp_c) => {
                if self.temp_failing {
                    log::info!("CPU temperature readable again");
                    self.temp_failing = false;
                }
                Some(self.fan.apply(temp_c, running))
            }
            Err(e) => {
                if !self.temp_failing {
                    log::warn!("Failed to read CPU temperature, fan unchanged: {e}");
                    self.temp_failing = true;
                }
                if running {
                    None
                } else {
                    self.fan.force(STOPPED_DUTY);
                    Some(STOPPED_DUTY)
                }
            }
        }
    }

    /// Perform the action bound to a gesture, then redraw the current page.
    /// Returns whether the slider moved.
    pub fn handle_event(&mut self, event: ButtonEvent) -> bool {
        let action = self.config.key.action_for(event).clone();
        log::info!("Key {event:?}: {action}");

        let slid = matches!(action, KeyAction::Slider);
        match action {
            KeyAction::Slider => {
                self.shared.advance_page(self.pages.len());
            }
            KeyAction::Switch => {
                let running = self.shared.toggle_running();
                log::info!("Fan {}", if running { "enabled" } else { "stopped" });
                self.update_fan();
            }
            KeyAction::Reboot => spawn_command("reboot".to_string()),
            KeyAction::Poweroff => spawn_command("poweroff".to_string()),
            KeyAction::Command(cmd) => spawn_command(cmd),
            KeyAction::None => {}
        }
        self.render();
        slid
    }

    /// Run until `shutdown` triggers. Leaves the fans at full speed on the way
    /// out when `fan.full_speed_on_exit` is set.
    pub async fn run(mut self, mut events: EventReceiver, shutdown: Shutdown) {
        let fan_period = Duration::from_secs_f64(self.config.fan.interval);
        let slider_period = Duration::from_secs_f64(self.config.slider.time);
        let auto_slide = self.config.slider.auto;

        // The first fan tick fires immediately; the slider waits a full period.
        let mut fan_tick = time::interval(fan_period);
        fan_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut slider_tick = time::interval_at(Instant::now() + slider_period, slider_period);
        slider_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.render();
        let mut events_open = true;

        loop {
            tokio::select! {
                _ = shutdown.wait() => {
                    log::info!("Control loop shutting down");
                    break;
                }
                event = events.recv(), if events_open => match event {
                    Some(event) => {
                        // A manual advance restarts the auto-advance period.
                        if self.handle_event(event) {
                            slider_tick.reset();
                        }
                    }
                    None => {
                        log::warn!("Key sampler is gone, no more key events");
                        events_open = false;
                    }
                },
                _ = fan_tick.tick() => {
                    self.update_fan();
                }
                _ = slider_tick.tick(), if auto_slide => {
                    self.advance_slider();
                }
            }
        }

        if self.config.fan.full_speed_on_exit {
            self.fan.release();
            log::info!("Fans left at full speed");
        } else if let Some(duty) = self.fan.current() {
            log::info!("Fans left at duty cycle {duty}");
        }
    }
}

/// Run a gesture's command in the background so the loop keeps going.
fn spawn_command(cmd: String) {
    tokio::spawn(async move {
        match command::check_call(&cmd).await {
            Ok(()) => log::info!("'{cmd}' finished"),
            Err(e) => log::error!("Key action failed: {e}"),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::event_channel;
    use crate::display::{Display, PageSource, PageView};
    use crate::fan::FULL_SPEED_DUTY;
    use std::io;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    /// Answers every page after `delay`.
    struct StubSource {
        delay: Duration,
    }

    impl StubSource {
        fn instant() -> Self {
            Self {
                delay: Duration::ZERO,
            }
        }
    }

    impl PageSource for StubSource {
        async fn collect(&mut self, page: Page) -> PageView {
            if !self.delay.is_zero() {
                time::sleep(self.delay).await;
            }
            PageView {
                page,
                lines: vec![page.to_string()],
            }
        }
    }

    #[derive(Clone, Default)]
    struct RecordingDisplay {
        shown: Arc<Mutex<Vec<Page>>>,
    }

    impl Display for RecordingDisplay {
        fn show(&mut self, view: &PageView) -> io::Result<()> {
            self.shown.lock().unwrap().push(view.page);
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct RecordingPwm {
        writes: Arc<Mutex<Vec<f64>>>,
    }

    impl DutyOutput for RecordingPwm {
        fn name(&self) -> String {
            "test".to_string()
        }

        fn write_duty(&mut self, fraction: f64) -> io::Result<()> {
            self.writes.lock().unwrap().push(fraction);
            Ok(())
        }
    }

    struct Rig {
        controller: Controller<RecordingPwm>,
        shared: Arc<SharedState>,
        shown: Arc<Mutex<Vec<Page>>>,
        writes: Arc<Mutex<Vec<f64>>>,
        thermal: PathBuf,
        _dir: tempfile::TempDir,
    }

    fn rig_with(source: StubSource, temp_millic: &str, tweak: impl FnOnce(&mut Config)) -> Rig {
        let dir = tempfile::tempdir().unwrap();
        let thermal = dir.path().join("temp");
        std::fs::write(&thermal, temp_millic).unwrap();

        let mut config = Config::default();
        config.board.thermal_path = thermal.clone();
        tweak(&mut config);

        let shared = Arc::new(SharedState::new());
        let display = RecordingDisplay::default();
        let shown = display.shown.clone();
        let pwm = RecordingPwm::default();
        let fan = FanController::new(config.fan.levels(), vec![pwm.clone()]);
        let renderer = Renderer::spawn(source, display);
        Rig {
            shown,
            writes: pwm.writes.clone(),
            controller: Controller::new(&config, shared.clone(), renderer, fan),
            shared,
            thermal,
            _dir: dir,
        }
    }

    fn rig(temp_millic: &str, tweak: impl FnOnce(&mut Config)) -> Rig {
        rig_with(StubSource::instant(), temp_millic, tweak)
    }

    async fn wait_until(mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_click_advances_slider() {
        let mut rig = rig("42000", |_| {});
        assert!(rig.controller.handle_event(ButtonEvent::Click));
        assert_eq!(rig.controller.current_page(), Page::Resources);
        wait_until(|| rig.shown.lock().unwrap().len() == 1).await;
        assert_eq!(*rig.shown.lock().unwrap(), vec![Page::Resources]);

        rig.controller.handle_event(ButtonEvent::Click);
        rig.controller.handle_event(ButtonEvent::Click);
        assert_eq!(rig.controller.current_page(), Page::System, "wraps after the disk page");
    }

    #[tokio::test]
    async fn test_double_click_toggles_fan_and_redraws() {
        let mut rig = rig("60000", |_| {});
        assert_eq!(rig.controller.update_fan(), Some(0.0));

        assert!(!rig.controller.handle_event(ButtonEvent::DoubleClick));
        assert!(!rig.shared.running());
        assert_eq!(*rig.writes.lock().unwrap(), vec![0.0, STOPPED_DUTY]);

        rig.controller.handle_event(ButtonEvent::DoubleClick);
        assert!(rig.shared.running());
        assert_eq!(*rig.writes.lock().unwrap(), vec![0.0, STOPPED_DUTY, 0.0]);

        // The page stays put but is drawn again after each toggle.
        wait_until(|| rig.shown.lock().unwrap().len() == 2).await;
        assert_eq!(*rig.shown.lock().unwrap(), vec![Page::System, Page::System]);
    }

    #[tokio::test]
    async fn test_fan_bands_from_thermal_zone() {
        let mut rig = rig("42000", |_| {});
        assert_eq!(rig.controller.update_fan(), Some(0.5));
    }

    #[tokio::test]
    async fn test_unreadable_temperature_skips_unless_stopped() {
        let mut rig = rig("garbage", |_| {});
        assert_eq!(rig.controller.update_fan(), None);
        assert!(rig.writes.lock().unwrap().is_empty());

        rig.shared.toggle_running();
        assert_eq!(rig.controller.update_fan(), Some(STOPPED_DUTY));
    }

    #[tokio::test]
    async fn test_long_press_unbound_only_redraws() {
        let mut rig = rig("42000", |_| {});
        assert!(!rig.controller.handle_event(ButtonEvent::LongPress));
        wait_until(|| !rig.shown.lock().unwrap().is_empty()).await;
        assert_eq!(*rig.shown.lock().unwrap(), vec![Page::System]);
        assert!(rig.writes.lock().unwrap().is_empty());
        assert!(rig.shared.running());
    }

    #[tokio::test]
    async fn test_command_action_runs() {
        let out = tempfile::tempdir().unwrap();
        let marker = out.path().join("pressed");
        let cmd = format!("touch '{}'", marker.display());
        let mut rig = rig("42000", |c| c.key.press = KeyAction::Command(cmd));

        rig.controller.handle_event(ButtonEvent::LongPress);
        wait_until(|| Path::new(&marker).exists()).await;
    }

    #[tokio::test]
    async fn test_run_loop_handles_events_and_releases_fan() {
        let rig = rig("42000", |c| {
            c.slider.auto = false;
            c.fan.interval = 3600.0;
        });
        let Rig {
            controller,
            shown,
            writes,
            ..
        } = rig;

        let (tx, rx) = event_channel();
        let shutdown = Shutdown::new();
        let handle = tokio::spawn(controller.run(rx, shutdown.clone()));

        tx.send(ButtonEvent::Click).unwrap();
        wait_until(|| shown.lock().unwrap().len() == 2).await;
        assert_eq!(*shown.lock().unwrap(), vec![Page::System, Page::Resources]);

        shutdown.trigger();
        time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
        assert_eq!(*writes.lock().unwrap(), vec![0.5, FULL_SPEED_DUTY]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slider_auto_advances() {
        let rig = rig("42000", |c| c.slider.time = 10.0);
        let Rig {
            controller, shown, ..
        } = rig;

        let (_tx, rx) = event_channel();
        let shutdown = Shutdown::new();
        let handle = tokio::spawn(controller.run(rx, shutdown.clone()));

        time::sleep(Duration::from_secs(25)).await;
        shutdown.trigger();
        handle.await.unwrap();
        assert_eq!(
            *shown.lock().unwrap(),
            vec![Page::System, Page::Resources, Page::Disks]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_advance_restarts_slider_period() {
        let rig = rig("42000", |c| c.slider.time = 10.0);
        let Rig {
            controller, shown, ..
        } = rig;

        let (tx, rx) = event_channel();
        let shutdown = Shutdown::new();
        let handle = tokio::spawn(controller.run(rx, shutdown.clone()));

        time::sleep(Duration::from_secs(8)).await;
        tx.send(ButtonEvent::Click).unwrap();

        // The auto-advance due at 10 s moves to 18 s.
        time::sleep(Duration::from_secs(4)).await;
        assert_eq!(*shown.lock().unwrap(), vec![Page::System, Page::Resources]);

        time::sleep(Duration::from_secs(7)).await;
        assert_eq!(
            *shown.lock().unwrap(),
            vec![Page::System, Page::Resources, Page::Disks]
        );

        shutdown.trigger();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_pages_do_not_hold_up_fan_or_shutdown() {
        let source = StubSource {
            delay: Duration::from_secs(60),
        };
        let rig = rig_with(source, "42000", |c| {
            c.fan.interval = 1.0;
            c.slider.time = 10.0;
        });
        let Rig {
            controller,
            writes,
            thermal,
            _dir,
            ..
        } = rig;

        let (tx, rx) = event_channel();
        let shutdown = Shutdown::new();
        let handle = tokio::spawn(controller.run(rx, shutdown.clone()));

        time::sleep(Duration::from_secs(12)).await;
        std::fs::write(&thermal, "60000").unwrap();
        tx.send(ButtonEvent::Click).unwrap();

        time::sleep(Duration::from_secs(3)).await;
        assert_eq!(*writes.lock().unwrap(), vec![0.5, 0.0]);

        shutdown.trigger();
        time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("shutdown waited on a page render")
            .unwrap();
        assert_eq!(*writes.lock().unwrap(), vec![0.5, 0.0]);
    }
}
