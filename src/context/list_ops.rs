//! List framing and direct drawing primitives.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::ScanContext;
use crate::command_list::ListState;
use crate::error::{ScanError, ScanResult};
use crate::hardware::{CardStatus, Command};
use crate::units::{HwPoint, Point2D};

/// One hatch vector in millimeters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hatch2D {
    /// Start in mm
    pub start: Point2D,
    /// End in mm
    pub end: Point2D,
}

impl Hatch2D {
    /// Vector from `start` to `end`.
    pub fn new(start: Point2D, end: Point2D) -> Self {
        Self { start, end }
    }
}

impl ScanContext {
    /// Open `list` for writing at `position`.
    pub fn start_list(&mut self, list: u32, position: u32) -> ScanResult<()> {
        self.cards
            .with_card(self.handle, |card| card.list.start(list, position))?;
        let result = self.control(&Command::SetStartList { list, position });
        self.reset_list_on_error(result)
    }

    /// Terminate the open list.
    pub fn end_list(&mut self) -> ScanResult<()> {
        self.cards.with_card(self.handle, |card| card.list.end())?;
        let result = self.control(&Command::SetEndOfList);
        self.reset_list_on_error(result)
    }

    /// Start a terminated list.
    pub fn execute_list(&mut self, list: u32, position: u32) -> ScanResult<()> {
        self.cards.with_card(self.handle, |card| card.list.execute(list))?;
        let result = self.control(&Command::ExecuteList { list, position });
        self.reset_list_on_error(result)
    }

    /// Switch to the other list once the running one finishes.
    pub fn set_auto_change(&mut self, position: u32) -> ScanResult<()> {
        self.control(&Command::AutoChange { position })
    }

    /// Lifecycle state of this card's list.
    pub fn list_state(&self) -> ScanResult<ListState> {
        self.cards.with_card(self.handle, |card| Ok(card.list.state()))
    }

    /// Abandon the list in progress.
    pub fn reset_list(&mut self) -> ScanResult<()> {
        self.cards.with_card(self.handle, |card| {
            card.list.reset();
            Ok(())
        })
    }

    /// Busy flag and position of the running list.
    pub fn status(&self) -> ScanResult<CardStatus> {
        let card_no = self.card_no()?;
        let status = self.transport.status(card_no);
        self.transport.check(card_no)?;
        Ok(status)
    }

    /// Write position of the list input.
    pub fn input_pointer(&self) -> ScanResult<u32> {
        let card_no = self.card_no()?;
        let pointer = self.transport.input_pointer(card_no);
        self.transport.check(card_no)?;
        Ok(pointer)
    }

    /// Block until the card reports the list finished.
    pub fn wait_for_list(&mut self) -> ScanResult<()> {
        let card_no = self.card_no()?;
        let timer = self.poll.start();
        loop {
            let status = self.transport.status(card_no);
            self.transport.check(card_no)?;
            if !status.is_busy() {
                break;
            }
            timer.wait()?;
        }
        debug!(card = card_no, elapsed = ?timer.elapsed(), "list finished");
        self.cards.with_card(self.handle, |card| {
            if card.list.state() == ListState::Executing {
                card.list.complete()
            } else {
                Ok(())
            }
        })
    }

    /// Jump and mark along `points_mm` with the given speeds (mm/s) and power (%).
    pub fn draw_polyline(
        &mut self,
        points_mm: &[Point2D],
        mark_speed: f64,
        jump_speed: f64,
        power_percent: f64,
    ) -> ScanResult<()> {
        let Some((first, rest)) = points_mm.split_first() else {
            return Ok(());
        };
        let mut commands = self.profile_commands(mark_speed, jump_speed, power_percent)?;
        let mut position = self.correction.position();
        let target = self.correction.to_hw(*first);
        if position != Some(target) {
            commands.push(Command::JumpAbs {
                x: target.x,
                y: target.y,
            });
        }
        position = Some(target);
        for point in rest {
            let target = self.correction.to_hw(*point);
            commands.push(Command::MarkAbs {
                x: target.x,
                y: target.y,
            });
            position = Some(target);
        }
        self.emit(&commands)?;
        self.commit_position(position);
        Ok(())
    }

    /// Mark independent vectors, jumping to each start.
    pub fn draw_hatches(
        &mut self,
        hatches: &[Hatch2D],
        mark_speed: f64,
        jump_speed: f64,
        power_percent: f64,
    ) -> ScanResult<()> {
        if hatches.is_empty() {
            return Ok(());
        }
        let mut commands = self.profile_commands(mark_speed, jump_speed, power_percent)?;
        let mut position = self.correction.position();
        for hatch in hatches {
            let start = self.correction.to_hw(hatch.start);
            let end = self.correction.to_hw(hatch.end);
            if position != Some(start) {
                commands.push(Command::JumpAbs {
                    x: start.x,
                    y: start.y,
                });
            }
            commands.push(Command::MarkAbs { x: end.x, y: end.y });
            position = Some(end);
        }
        self.emit(&commands)?;
        self.commit_position(position);
        Ok(())
    }

    /// Wait inside the list for `delay_us`, rounded to 10 µs.
    pub fn add_custom_delay(&mut self, delay_us: u32) -> ScanResult<()> {
        let ticks = delay_us.div_ceil(crate::limits::DELAY_TICK_US);
        if ticks == 0 {
            return Ok(());
        }
        self.emit(&[Command::LongDelay(ticks)])
    }

    /// Write a free variable inside the list.
    pub fn set_free_variable(&mut self, index: u32, value: u32) -> ScanResult<()> {
        self.emit(&[Command::SetFreeVariable { index, value }])
    }

    /// Write laser power as a percentage through calibration and the active port.
    ///
    /// The calibrated value is clipped to 0..=100 % by the port conversion.
    pub fn set_laser_power(&mut self, percent: f64) -> ScanResult<()> {
        let calibrated = self.calibration.resolve(percent)?;
        let commands = self.laser_port.power_commands(calibrated);
        self.emit(&commands)
    }

    /// Speeds and calibrated power commands for a direct draw call.
    fn profile_commands(&self, mark_speed: f64, jump_speed: f64, power_percent: f64) -> ScanResult<Vec<Command>> {
        let mark = self.speed_bits(mark_speed)?;
        let jump = self.speed_bits(jump_speed)?;
        let calibrated = self.calibration.resolve(power_percent)?;
        let mut commands = vec![Command::SetMarkSpeed(mark), Command::SetJumpSpeed(jump)];
        commands.extend(self.laser_port.power_commands(calibrated));
        Ok(commands)
    }

    /// Convert a speed in mm/s to bits per millisecond.
    pub(crate) fn speed_bits(&self, speed_mm_s: f64) -> ScanResult<f64> {
        if !speed_mm_s.is_finite() || speed_mm_s <= 0.0 {
            return Err(ScanError::InvalidParameter(format!("speed must be positive, got {speed_mm_s} mm/s")));
        }
        Ok(speed_mm_s / 1000.0 * self.correction.xy_factor())
    }

    pub(crate) fn commit_position(&mut self, position: Option<HwPoint>) {
        match position {
            Some(position) => self.correction.record_position(position),
            None => self.correction.invalidate_position(),
        }
    }

    /// Submit commands, reserving list room first when a list is open.
    ///
    /// With no list open the commands are written at the card's current input
    /// position. Ended or executing lists reject new commands.
    pub(crate) fn emit(&mut self, commands: &[Command]) -> ScanResult<()> {
        if commands.is_empty() {
            return Ok(());
        }
        let list_commands = commands.iter().filter(|c| c.is_list_command()).count();
        let list_commands = u32::try_from(list_commands).map_err(|_| ScanError::ListCapacityExceeded {
            capacity: self.capabilities.max_list_size,
        })?;
        self.cards
            .with_card(self.handle, |card| card.list.reserve(list_commands))?;

        let card_no = self.card_no()?;
        for command in commands {
            self.transport.submit_checked(card_no, command)?;
        }
        Ok(())
    }

    fn reset_list_on_error(&mut self, result: ScanResult<()>) -> ScanResult<()> {
        if let Err(err) = &result {
            warn!(error = %err, "list command failed, resetting list state");
            self.reset_list()?;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::capabilities::CardCapabilities;
    use crate::hardware::MockTransport;
    use crate::poll::PollControl;
    use crate::selector::CardSelector;

    fn context() -> (Arc<MockTransport>, ScanContext) {
        let mock = Arc::new(MockTransport::new());
        mock.add_card(1000);
        let selector = CardSelector::new(mock.clone(), CardCapabilities::rtc6());
        let mut context = selector.acquire_card(1).unwrap();
        context.set_poll_control(PollControl::new(Duration::ZERO));
        (mock, context)
    }

    #[test]
    fn test_second_start_is_rejected() {
        let (_mock, mut ctx) = context();
        ctx.start_list(1, 0).unwrap();
        assert!(matches!(
            ctx.start_list(1, 0),
            Err(ScanError::ListStateViolation { .. })
        ));
    }

    #[test]
    fn test_list_lifecycle() {
        let (mock, mut ctx) = context();
        ctx.start_list(1, 0).unwrap();
        ctx.draw_polyline(&[Point2D::new(0.0, 0.0), Point2D::new(1.0, 0.0)], 500.0, 1000.0, 50.0)
            .unwrap();
        ctx.end_list().unwrap();
        ctx.execute_list(1, 0).unwrap();
        assert_eq!(ctx.list_state().unwrap(), ListState::Executing);
        ctx.wait_for_list().unwrap();
        assert_eq!(ctx.list_state().unwrap(), ListState::Idle);
        assert_eq!(
            mock.motion_commands(1),
            vec![Command::JumpAbs { x: 0, y: 0 }, Command::MarkAbs { x: 10_000, y: 0 }]
        );
    }

    #[test]
    fn test_commands_rejected_after_end() {
        let (_mock, mut ctx) = context();
        ctx.start_list(1, 0).unwrap();
        ctx.end_list().unwrap();
        assert!(matches!(
            ctx.add_custom_delay(100),
            Err(ScanError::ListStateViolation { .. })
        ));
    }

    #[test]
    fn test_draw_polyline_speed_units() {
        let (mock, mut ctx) = context();
        ctx.draw_polyline(&[Point2D::new(0.0, 0.0), Point2D::new(1.0, 1.0)], 2000.0, 4000.0, 0.0)
            .unwrap();
        let commands = mock.commands(1);
        assert_eq!(commands[0], Command::SetMarkSpeed(20_000.0));
        assert_eq!(commands[1], Command::SetJumpSpeed(40_000.0));
    }

    #[test]
    fn test_hatches_skip_redundant_jumps() {
        let (mock, mut ctx) = context();
        let hatches = [
            Hatch2D::new(Point2D::new(0.0, 0.0), Point2D::new(1.0, 0.0)),
            Hatch2D::new(Point2D::new(1.0, 0.0), Point2D::new(1.0, 1.0)),
        ];
        ctx.draw_hatches(&hatches, 100.0, 100.0, 10.0).unwrap();
        let jumps = mock
            .motion_commands(1)
            .into_iter()
            .filter(|c| matches!(c, Command::JumpAbs { .. }))
            .count();
        assert_eq!(jumps, 1);
    }

    #[test]
    fn test_capacity_is_enforced() {
        let (_mock, mut ctx) = context();
        ctx.configure_lists(4, 4).unwrap();
        ctx.start_list(1, 0).unwrap();
        let points: Vec<Point2D> = (0..6).map(|i| Point2D::new(i as f64, 0.0)).collect();
        assert!(matches!(
            ctx.draw_polyline(&points, 100.0, 100.0, 10.0),
            Err(ScanError::ListCapacityExceeded { capacity: 4 })
        ));
    }

    #[test]
    fn test_custom_delay_rounds_up() {
        let (mock, mut ctx) = context();
        ctx.add_custom_delay(25).unwrap();
        assert_eq!(mock.commands(1), vec![Command::LongDelay(3)]);
    }

    #[test]
    fn test_wait_for_list_times_out() {
        let (mock, mut ctx) = context();
        mock.set_list_busy_polls(u32::MAX);
        ctx.set_poll_control(
            PollControl::new(Duration::from_millis(1)).with_timeout(Duration::from_millis(5)),
        );
        ctx.start_list(1, 0).unwrap();
        ctx.end_list().unwrap();
        ctx.execute_list(1, 0).unwrap();
        assert!(matches!(ctx.wait_for_list(), Err(ScanError::Timeout { .. })));
    }

    #[test]
    fn test_power_is_clipped_after_calibration() {
        let (mock, mut ctx) = context();
        ctx.set_linear_power_calibration(-40.0, 1.0).unwrap();
        // 120 % resolves to 80 %; clipping first would have given 60 %.
        ctx.set_laser_power(120.0).unwrap();
        ctx.set_laser_power(150.0).unwrap();
        assert_eq!(
            mock.commands(1),
            vec![Command::WriteDa1(3276), Command::WriteDa1(4095)]
        );
    }
}
