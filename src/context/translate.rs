//! Toolpath layer translation.
//!
//! A layer is translated in two steps. [`ScanContext::plan_layer`] walks every
//! segment, validates all parameters and produces the complete command
//! sequence without touching the card. Only a plan that translated without
//! error is written, so a rejected layer leaves no partial list behind.
//!
//! Per segment the plan carries, in order: skywriting settings, PID and beam
//! profile selection, speeds, laser power, then the geometry. Measurement
//! brackets enclose the whole layer or each marked vector depending on the
//! measurement feedback mode.

use tracing::{debug, info};

use super::oie::OieRecordingMode;
use super::skywriting::SkywritingParameters;
use super::tags::following_tag;
use super::ScanContext;
use crate::error::{ScanError, ScanResult};
use crate::hardware::{Command, OieCommand};
use crate::toolpath::{
    SegmentIds, SegmentKind, ToolpathLayer, AFX_MODE_INDEX, AFX_NAMESPACE, LASER_INDEX,
    LASER_NAMESPACE, OIE_NAMESPACE, OIE_PID_INDEX,
};
use crate::units::{HwPoint, Point2D};

/// Free variable that carries the measurement tag of the vector being marked.
pub const MEASUREMENT_TAG_VARIABLE: u32 = 0;

/// Segment filter on an integer attribute. Segments without the attribute read as 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeFilter {
    /// Attribute namespace
    pub namespace: String,
    /// Attribute name
    pub name: String,
    /// Value a segment must carry to pass
    pub value: i64,
}

impl AttributeFilter {
    /// Pass segments whose attribute `namespace#name` equals `value`.
    pub fn new(namespace: &str, name: &str, value: i64) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            value,
        }
    }

    /// Whether `segment` of `layer` passes the filter.
    pub fn matches(&self, layer: &dyn ToolpathLayer, segment: usize) -> bool {
        layer
            .segment_integer_attribute(segment, &self.namespace, &self.name)
            .unwrap_or(0)
            == self.value
    }
}

/// Laser index a segment is routed to; segments without the attribute go to laser 0.
pub fn segment_laser_index(layer: &dyn ToolpathLayer, segment: usize) -> ScanResult<u32> {
    let index = layer
        .segment_integer_attribute(segment, LASER_NAMESPACE, LASER_INDEX)
        .unwrap_or(0);
    u32::try_from(index)
        .map_err(|_| ScanError::InvalidParameter(format!("laser index {index} in segment {segment}")))
}

/// Validated command sequence for one layer.
#[derive(Debug, Clone)]
pub struct LayerPlan {
    commands: Vec<Command>,
    tags: Vec<(SegmentIds, u32)>,
    first_tag: u32,
    start_position: Option<HwPoint>,
    end_position: Option<HwPoint>,
    segments: usize,
}

impl LayerPlan {
    /// Commands between start and end of list.
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Number of segments that produced commands.
    pub fn segments_translated(&self) -> usize {
        self.segments
    }

    /// Number of measurement tags the plan issues.
    pub fn tag_count(&self) -> usize {
        self.tags.len()
    }

    /// Number of list slots the plan occupies.
    pub fn list_command_count(&self) -> usize {
        self.commands.iter().filter(|c| c.is_list_command()).count()
    }
}

impl ScanContext {
    /// Translate every segment of `layer` without writing to the card.
    pub fn plan_layer(&self, layer: &dyn ToolpathLayer) -> ScanResult<LayerPlan> {
        self.plan(layer, None)
    }

    /// Translate only the segments routed to `laser_index`.
    pub fn plan_layer_for_laser(&self, layer: &dyn ToolpathLayer, laser_index: u32) -> ScanResult<LayerPlan> {
        self.plan(layer, Some(laser_index))
    }

    /// Write a plan as list 1 and start it.
    pub fn submit_plan(&mut self, plan: &LayerPlan) -> ScanResult<()> {
        self.ensure_current(plan)?;
        self.start_list(1, 0)?;
        let result = self
            .emit(&plan.commands)
            .and_then(|()| self.end_list())
            .and_then(|()| self.execute_list(1, 0));
        if let Err(err) = result {
            self.reset_list()?;
            return Err(err);
        }
        self.commit_plan(plan);
        Ok(())
    }

    /// Translate a layer into the list that is currently open.
    pub fn add_layer_to_list(&mut self, layer: &dyn ToolpathLayer) -> ScanResult<()> {
        let plan = self.plan_layer(layer)?;
        self.emit(&plan.commands)?;
        self.commit_plan(&plan);
        Ok(())
    }

    /// Translate, execute and wait for one layer.
    pub fn draw_layer(&mut self, layer: &dyn ToolpathLayer) -> ScanResult<()> {
        let plan = self.plan_layer(layer)?;
        self.run_plan(&plan)
    }

    /// [`ScanContext::draw_layer`] restricted to the segments of one laser.
    pub fn draw_layer_for_laser(&mut self, layer: &dyn ToolpathLayer, laser_index: u32) -> ScanResult<()> {
        let plan = self.plan_layer_for_laser(layer, laser_index)?;
        self.run_plan(&plan)
    }

    fn run_plan(&mut self, plan: &LayerPlan) -> ScanResult<()> {
        self.submit_plan(plan)?;
        self.wait_for_list()?;
        info!(
            segments = plan.segments,
            commands = plan.commands.len(),
            tags = plan.tags.len(),
            "layer drawn"
        );
        Ok(())
    }

    fn plan(&self, layer: &dyn ToolpathLayer, laser_index: Option<u32>) -> ScanResult<LayerPlan> {
        let units = layer.units();
        if !units.is_finite() || units <= 0.0 {
            return Err(ScanError::InvalidParameter(format!("layer units must be positive, got {units}")));
        }
        if self.oie_mode.is_active() && !self.capabilities.supports_oie {
            return Err(ScanError::OieNotSupported);
        }
        let capacity = self.cards.with_card(self.handle, |card| Ok(card.list.capacity()))?;

        let mut planner = Planner {
            ctx: self,
            units,
            use_3d: self.z_enabled && self.capabilities.supports_3d,
            capacity,
            commands: self.oie_mode.layer_prologue(),
            position: self.correction.position(),
            z: None,
            next_tag: self.tags.peek_next(),
            tags: Vec::new(),
            power_code: None,
            pid: None,
            afx_mode: None,
            segments: 0,
        };

        for segment in 0..layer.segment_count() {
            if let Some(filter) = &self.attribute_filter {
                if !filter.matches(layer, segment) {
                    continue;
                }
            }
            if let Some(laser_index) = laser_index {
                if segment_laser_index(layer, segment)? != laser_index {
                    continue;
                }
            }
            planner.segment(layer, segment)?;
        }
        planner.commands.extend(self.oie_mode.layer_epilogue());

        let plan = LayerPlan {
            commands: planner.commands,
            tags: planner.tags,
            first_tag: self.tags.peek_next(),
            start_position: self.correction.position(),
            end_position: planner.position,
            segments: planner.segments,
        };
        if plan.list_command_count() as u64 >= capacity as u64 {
            return Err(ScanError::ListCapacityExceeded { capacity });
        }
        debug!(
            segments = plan.segments,
            commands = plan.commands.len(),
            "layer planned"
        );
        Ok(plan)
    }

    fn ensure_current(&self, plan: &LayerPlan) -> ScanResult<()> {
        if plan.first_tag != self.tags.peek_next() || plan.start_position != self.correction.position() {
            return Err(ScanError::InvalidParameter(
                "layer plan is out of date, plan the layer again".to_string(),
            ));
        }
        Ok(())
    }

    fn commit_plan(&mut self, plan: &LayerPlan) {
        self.tags.begin_layer();
        for (ids, vector) in &plan.tags {
            self.tags.issue(*ids, *vector);
        }
        self.commit_position(plan.end_position);
    }
}

struct Planner<'a> {
    ctx: &'a ScanContext,
    units: f64,
    use_3d: bool,
    capacity: u32,
    commands: Vec<Command>,
    position: Option<HwPoint>,
    z: Option<i32>,
    next_tag: u32,
    tags: Vec<(SegmentIds, u32)>,
    power_code: Option<u32>,
    pid: Option<u32>,
    afx_mode: Option<u32>,
    segments: usize,
}

impl Planner<'_> {
    fn segment(&mut self, layer: &dyn ToolpathLayer, index: usize) -> ScanResult<()> {
        let kind = layer.segment_kind(index);
        let points = layer.segment_points(index);
        if kind == SegmentKind::Hatch && points.len() % 2 != 0 {
            return Err(ScanError::InvalidPointCount {
                segment: index,
                count: points.len(),
            });
        }
        let drawable = match kind {
            SegmentKind::Hatch => !points.is_empty(),
            SegmentKind::Polyline | SegmentKind::Loop => points.len() >= 2,
        };
        if !drawable {
            return Ok(());
        }

        let profile = layer.segment_profile(index);
        let ids = layer.segment_ids(index);
        let max_power = self
            .ctx
            .max_laser_power
            .ok_or(ScanError::NotInitialized("max laser power"))?;
        if !profile.laser_power.is_finite() || profile.laser_power < 0.0 {
            return Err(ScanError::InvalidParameter(format!(
                "laser power {} W in segment {index}",
                profile.laser_power
            )));
        }
        let percent = profile.laser_power * 100.0 / max_power;
        let mark_speed = self.ctx.speed_bits(profile.speed)?;
        let jump_speed = self.ctx.speed_bits(profile.jump_speed)?;
        let z = if self.use_3d {
            if !profile.focus.is_finite() {
                return Err(ScanError::InvalidParameter(format!("focus {} in segment {index}", profile.focus)));
            }
            self.ctx.correction.z_to_hw(profile.focus)
        } else {
            0
        };

        if let Some(skywriting) = SkywritingParameters::from_segment(layer, index)? {
            self.commands.extend(skywriting.commands(&self.ctx.capabilities)?);
        }
        self.select_pid(layer, index)?;
        self.select_afx_mode(layer, index)?;
        self.commands.push(Command::SetMarkSpeed(mark_speed));
        self.commands.push(Command::SetJumpSpeed(jump_speed));
        self.power(percent)?;

        let points: Vec<Point2D> = points
            .iter()
            .map(|p| Point2D::new(p.x * self.units, p.y * self.units))
            .collect();
        match kind {
            SegmentKind::Polyline => self.polyline(&points, ids, percent, z)?,
            SegmentKind::Loop => {
                let mut closed = points;
                if let (Some(first), Some(last)) = (closed.first().copied(), closed.last().copied()) {
                    if first != last {
                        closed.push(first);
                    }
                }
                self.polyline(&closed, ids, percent, z)?;
            }
            SegmentKind::Hatch => self.hatches(&points, ids, percent, z)?,
        }
        self.segments += 1;
        Ok(())
    }

    fn polyline(&mut self, points: &[Point2D], ids: SegmentIds, percent: f64, z: i32) -> ScanResult<()> {
        let Some((first, rest)) = points.split_first() else {
            return Ok(());
        };
        self.jump(*first, z);
        self.measurement(OieCommand::StartMeasurement);
        let mut from = *first;
        for (vector, to) in rest.iter().enumerate() {
            self.tag(ids, vector as u32);
            self.mark_line(from, *to, percent, z)?;
            from = *to;
        }
        self.measurement(OieCommand::StopMeasurement);
        Ok(())
    }

    fn hatches(&mut self, points: &[Point2D], ids: SegmentIds, percent: f64, z: i32) -> ScanResult<()> {
        for (vector, pair) in points.chunks_exact(2).enumerate() {
            self.jump(pair[0], z);
            self.measurement(OieCommand::StartMeasurement);
            self.tag(ids, vector as u32);
            self.mark_line(pair[0], pair[1], percent, z)?;
            self.measurement(OieCommand::StopMeasurement);
        }
        Ok(())
    }

    /// Mark from `from` to `to`, split into equal pieces above the subdivision threshold.
    fn mark_line(&mut self, from: Point2D, to: Point2D, percent: f64, z: i32) -> ScanResult<()> {
        let pieces = self.pieces(from, to)?;
        let mut start = from;
        for k in 1..=pieces {
            let end = if k == pieces {
                to
            } else {
                from.lerp(&to, k as f64 / pieces as f64)
            };
            if let Some(modulation) = &self.ctx.power_modulation {
                let modulated = modulation(start, end, percent);
                self.power(modulated)?;
            }
            self.mark(end, z);
            start = end;
        }
        Ok(())
    }

    fn pieces(&self, from: Point2D, to: Point2D) -> ScanResult<u32> {
        let Some(threshold) = self.ctx.subdivision_threshold() else {
            return Ok(1);
        };
        let length = from.distance(&to);
        if length <= threshold {
            return Ok(1);
        }
        let pieces = (length / threshold).ceil();
        if pieces >= self.capacity as f64 {
            return Err(ScanError::ListCapacityExceeded {
                capacity: self.capacity,
            });
        }
        Ok(pieces as u32)
    }

    fn jump(&mut self, point: Point2D, z: i32) {
        let target = self.ctx.correction.to_hw(point);
        if self.position == Some(target) && (!self.use_3d || self.z == Some(z)) {
            return;
        }
        if self.use_3d {
            self.commands.push(Command::JumpAbs3d {
                x: target.x,
                y: target.y,
                z,
            });
        } else {
            self.commands.push(Command::JumpAbs {
                x: target.x,
                y: target.y,
            });
        }
        self.position = Some(target);
        self.z = Some(z);
    }

    fn mark(&mut self, point: Point2D, z: i32) {
        let target = self.ctx.correction.to_hw(point);
        if self.use_3d {
            self.commands.push(Command::MarkAbs3d {
                x: target.x,
                y: target.y,
                z,
            });
        } else {
            self.commands.push(Command::MarkAbs {
                x: target.x,
                y: target.y,
            });
        }
        self.position = Some(target);
        self.z = Some(z);
    }

    fn power(&mut self, percent: f64) -> ScanResult<()> {
        let calibrated = self.ctx.calibration.resolve(percent)?;
        let port = self.ctx.laser_port;
        let code = port.digital_code(calibrated);
        if self.power_code != Some(code) {
            self.commands.extend(port.power_commands(calibrated));
            self.power_code = Some(code);
        }
        Ok(())
    }

    fn tag(&mut self, ids: SegmentIds, vector: u32) {
        if !self.ctx.tagging {
            return;
        }
        let tag = self.next_tag;
        self.commands.push(Command::SetFreeVariable {
            index: MEASUREMENT_TAG_VARIABLE,
            value: tag,
        });
        self.tags.push((ids, vector));
        self.next_tag = following_tag(tag);
    }

    fn measurement(&mut self, command: OieCommand) {
        if self.ctx.oie_mode.is_per_vector() {
            self.commands.push(Command::Oie(command));
        }
    }

    fn select_pid(&mut self, layer: &dyn ToolpathLayer, index: usize) -> ScanResult<()> {
        if self.ctx.oie_mode == OieRecordingMode::Disabled {
            return Ok(());
        }
        let Some(pid) = layer.segment_integer_attribute(index, OIE_NAMESPACE, OIE_PID_INDEX) else {
            return Ok(());
        };
        let pid = u32::try_from(pid)
            .map_err(|_| ScanError::InvalidParameter(format!("OIE PID index {pid} in segment {index}")))?;
        if self.pid != Some(pid) {
            self.commands.push(Command::Oie(OieCommand::SelectPid(pid)));
            self.pid = Some(pid);
        }
        Ok(())
    }

    fn select_afx_mode(&mut self, layer: &dyn ToolpathLayer, index: usize) -> ScanResult<()> {
        if !self.ctx.afx.is_enabled() {
            return Ok(());
        }
        let Some(mode) = layer.segment_integer_attribute(index, AFX_NAMESPACE, AFX_MODE_INDEX) else {
            return Ok(());
        };
        let mode = u32::try_from(mode).map_err(|_| ScanError::InvalidAfxParameter {
            name: "mode",
            value: u32::MAX,
        })?;
        if self.afx_mode != Some(mode) {
            self.commands.extend(self.ctx.afx.selection_commands(mode)?);
            self.afx_mode = Some(mode);
        }
        Ok(())
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
    use crate::toolpath::{AttributeValue, MemoryLayer, MemorySegment, SegmentProfile};

    fn context() -> (Arc<MockTransport>, ScanContext) {
        let mock = Arc::new(MockTransport::new());
        mock.add_card(1000);
        let selector = CardSelector::new(mock.clone(), CardCapabilities::rtc6());
        let mut context = selector.acquire_card(1).unwrap();
        context.set_poll_control(PollControl::new(Duration::ZERO));
        context.set_max_laser_power(400.0).unwrap();
        (mock, context)
    }

    fn profile() -> SegmentProfile {
        SegmentProfile {
            speed: 800.0,
            jump_speed: 3000.0,
            laser_power: 200.0,
            focus: 0.0,
        }
    }

    fn polyline(points: &[(f64, f64)]) -> MemorySegment {
        let points = points.iter().map(|&(x, y)| Point2D::new(x, y)).collect();
        MemorySegment::new(SegmentKind::Polyline, points, profile())
    }

    fn segment(kind: SegmentKind, points: &[(f64, f64)]) -> MemorySegment {
        let points = points.iter().map(|&(x, y)| Point2D::new(x, y)).collect();
        MemorySegment::new(kind, points, profile())
    }

    #[test]
    fn test_plan_does_not_touch_the_card() {
        let (mock, ctx) = context();
        let layer = MemoryLayer::new(1.0).with_segment(polyline(&[(0.0, 0.0), (10.0, 0.0)]));
        let plan = ctx.plan_layer(&layer).unwrap();
        assert_eq!(plan.segments_translated(), 1);
        assert!(mock.commands(1).is_empty());
    }

    #[test]
    fn test_speed_and_power_conversion() {
        let (_mock, ctx) = context();
        let layer = MemoryLayer::new(1.0).with_segment(polyline(&[(0.0, 0.0), (10.0, 0.0)]));
        let plan = ctx.plan_layer(&layer).unwrap();
        assert_eq!(
            &plan.commands()[..3],
            &[
                Command::SetMarkSpeed(8000.0),
                Command::SetJumpSpeed(30_000.0),
                Command::WriteDa1(2048),
            ]
        );
    }

    #[test]
    fn test_missing_max_power_is_not_initialized() {
        let mock = Arc::new(MockTransport::new());
        mock.add_card(1);
        let selector = CardSelector::new(mock, CardCapabilities::rtc6());
        let ctx = selector.acquire_card(1).unwrap();
        let layer = MemoryLayer::new(1.0).with_segment(polyline(&[(0.0, 0.0), (1.0, 0.0)]));
        assert!(matches!(
            ctx.plan_layer(&layer),
            Err(ScanError::NotInitialized(_))
        ));
    }

    #[test]
    fn test_layer_units_scale_points() {
        let (_mock, ctx) = context();
        let layer = MemoryLayer::new(0.5).with_segment(polyline(&[(0.0, 0.0), (4.0, 2.0)]));
        let plan = ctx.plan_layer(&layer).unwrap();
        assert!(plan
            .commands()
            .contains(&Command::MarkAbs { x: 20_000, y: 10_000 }));
    }

    #[test]
    fn test_loop_is_closed() {
        let (_mock, ctx) = context();
        let layer = MemoryLayer::new(1.0).with_segment(segment(
            SegmentKind::Loop,
            &[(0.0, 0.0), (1.0, 0.0), (1.0, 1.0)],
        ));
        let plan = ctx.plan_layer(&layer).unwrap();
        let marks: Vec<_> = plan
            .commands()
            .iter()
            .filter(|c| matches!(c, Command::MarkAbs { .. }))
            .collect();
        assert_eq!(marks.len(), 3);
        assert_eq!(marks[2], &Command::MarkAbs { x: 0, y: 0 });
    }

    #[test]
    fn test_hatches_are_jump_mark_pairs() {
        let (_mock, ctx) = context();
        let layer = MemoryLayer::new(1.0).with_segment(segment(
            SegmentKind::Hatch,
            &[(0.0, 0.0), (1.0, 0.0), (0.0, 1.0), (1.0, 1.0)],
        ));
        let plan = ctx.plan_layer(&layer).unwrap();
        let motion: Vec<_> = plan.commands().iter().filter(|c| c.is_motion()).cloned().collect();
        assert_eq!(
            motion,
            vec![
                Command::JumpAbs { x: 0, y: 0 },
                Command::MarkAbs { x: 10_000, y: 0 },
                Command::JumpAbs { x: 0, y: 10_000 },
                Command::MarkAbs { x: 10_000, y: 10_000 },
            ]
        );
    }

    #[test]
    fn test_short_polylines_are_skipped() {
        let (_mock, ctx) = context();
        let layer = MemoryLayer::new(1.0).with_segment(polyline(&[(1.0, 1.0)]));
        let plan = ctx.plan_layer(&layer).unwrap();
        assert_eq!(plan.segments_translated(), 0);
        assert!(plan.commands().is_empty());
    }

    #[test]
    fn test_tags_follow_marked_vectors() {
        let (mock, mut ctx) = context();
        ctx.enable_measurement_tagging();
        let layer = MemoryLayer::new(1.0).with_segment(
            polyline(&[(0.0, 0.0), (1.0, 0.0), (2.0, 0.0)]).with_ids(SegmentIds {
                part: 4,
                profile: 5,
                segment: 6,
            }),
        );
        ctx.draw_layer(&layer).unwrap();
        assert_eq!(ctx.measurement_tags().len(), 2);
        let second = ctx.lookup_measurement_tag(2).unwrap();
        assert_eq!((second.part, second.segment, second.vector), (4, 6, 1));
        assert!(mock.commands(1).contains(&Command::SetFreeVariable {
            index: MEASUREMENT_TAG_VARIABLE,
            value: 2
        }));
    }

    #[test]
    fn test_tag_ledger_covers_last_layer_only() {
        let (_mock, mut ctx) = context();
        ctx.enable_measurement_tagging();
        let layer = MemoryLayer::new(1.0).with_segment(polyline(&[(0.0, 0.0), (1.0, 0.0), (2.0, 0.0)]));
        ctx.draw_layer(&layer).unwrap();
        ctx.draw_layer(&layer).unwrap();
        assert_eq!(ctx.measurement_tags().len(), 2);
        assert!(matches!(
            ctx.lookup_measurement_tag(1),
            Err(ScanError::MeasurementTagNotFound(1))
        ));
        assert_eq!(ctx.lookup_measurement_tag(4).unwrap().vector, 1);
    }

    #[test]
    fn test_subdivided_mark_gets_one_tag() {
        let (_mock, mut ctx) = context();
        ctx.enable_measurement_tagging();
        ctx.set_subdivision_threshold(1.0).unwrap();
        let layer = MemoryLayer::new(1.0).with_segment(polyline(&[(0.0, 0.0), (5.0, 0.0)]));
        let plan = ctx.plan_layer(&layer).unwrap();
        assert_eq!(plan.tag_count(), 1);
    }

    #[test]
    fn test_attribute_filter_selects_segments() {
        let (_mock, mut ctx) = context();
        ctx.set_attribute_filter("urn:test", "laser", 2);
        let layer = MemoryLayer::new(1.0)
            .with_segment(polyline(&[(0.0, 0.0), (1.0, 0.0)]))
            .with_segment(
                polyline(&[(0.0, 1.0), (1.0, 1.0)]).with_attribute(
                    "urn:test",
                    "laser",
                    AttributeValue::Integer(2),
                ),
            );
        let plan = ctx.plan_layer(&layer).unwrap();
        assert_eq!(plan.segments_translated(), 1);
        assert!(plan.commands().contains(&Command::JumpAbs { x: 0, y: 10_000 }));
    }

    #[test]
    fn test_missing_filter_attribute_reads_as_zero() {
        let (_mock, mut ctx) = context();
        ctx.set_attribute_filter("urn:test", "laser", 0);
        let layer = MemoryLayer::new(1.0).with_segment(polyline(&[(0.0, 0.0), (1.0, 0.0)]));
        assert_eq!(ctx.plan_layer(&layer).unwrap().segments_translated(), 1);
    }

    #[test]
    fn test_laser_routing() {
        let (_mock, ctx) = context();
        let layer = MemoryLayer::new(1.0)
            .with_segment(polyline(&[(0.0, 0.0), (1.0, 0.0)]))
            .with_segment(polyline(&[(0.0, 1.0), (1.0, 1.0)]).with_attribute(
                LASER_NAMESPACE,
                LASER_INDEX,
                AttributeValue::Integer(1),
            ));
        assert_eq!(ctx.plan_layer_for_laser(&layer, 0).unwrap().segments_translated(), 1);
        assert_eq!(ctx.plan_layer_for_laser(&layer, 1).unwrap().segments_translated(), 1);
        assert_eq!(ctx.plan_layer_for_laser(&layer, 2).unwrap().segments_translated(), 0);
        assert_eq!(ctx.plan_layer(&layer).unwrap().segments_translated(), 2);
    }

    #[test]
    fn test_per_vector_measurement_brackets() {
        let (_mock, mut ctx) = context();
        ctx.set_oie_mode(OieRecordingMode::LaserActive).unwrap();
        let layer = MemoryLayer::new(1.0).with_segment(polyline(&[(0.0, 0.0), (1.0, 0.0), (2.0, 0.0)]));
        let plan = ctx.plan_layer(&layer).unwrap();
        let commands = plan.commands();
        let jump = commands
            .iter()
            .position(|c| matches!(c, Command::JumpAbs { .. }))
            .unwrap();
        assert_eq!(commands[jump + 1], Command::Oie(OieCommand::StartMeasurement));
        let stops = commands
            .iter()
            .filter(|c| **c == Command::Oie(OieCommand::StopMeasurement))
            .count();
        // one after the polyline, one closing the layer
        assert_eq!(stops, 2);
    }

    #[test]
    fn test_continuous_measurement_wraps_layer() {
        let (_mock, mut ctx) = context();
        ctx.set_oie_mode(OieRecordingMode::EnableAndContinuous).unwrap();
        let layer = MemoryLayer::new(1.0).with_segment(
            polyline(&[(0.0, 0.0), (1.0, 0.0)]).with_attribute(
                OIE_NAMESPACE,
                OIE_PID_INDEX,
                AttributeValue::Integer(3),
            ),
        );
        let plan = ctx.plan_layer(&layer).unwrap();
        let commands = plan.commands();
        assert_eq!(commands[0], Command::Oie(OieCommand::Enable));
        assert_eq!(commands[1], Command::Oie(OieCommand::StartMeasurement));
        assert_eq!(commands[2], Command::Oie(OieCommand::SelectPid(3)));
        assert_eq!(
            &commands[commands.len() - 2..],
            &[
                Command::Oie(OieCommand::StopMeasurement),
                Command::Oie(OieCommand::Disable)
            ]
        );
    }

    #[test]
    fn test_power_modulation_per_piece() {
        let (_mock, mut ctx) = context();
        ctx.set_subdivision_threshold(5.0).unwrap();
        ctx.set_power_modulation(Box::new(|_start, end, percent| if end.x > 5.0 { percent / 2.0 } else { percent }));
        let layer = MemoryLayer::new(1.0).with_segment(polyline(&[(0.0, 0.0), (10.0, 0.0)]));
        let plan = ctx.plan_layer(&layer).unwrap();
        let powers: Vec<_> = plan
            .commands()
            .iter()
            .filter(|c| matches!(c, Command::WriteDa1(_)))
            .cloned()
            .collect();
        assert_eq!(powers, vec![Command::WriteDa1(2048), Command::WriteDa1(1024)]);
    }

    #[test]
    fn test_afx_selection_on_mode_change() {
        let (_mock, mut ctx) = context();
        ctx.afx_selector_mut().enable();
        let with_mode = |mode| {
            polyline(&[(0.0, 0.0), (1.0, 0.0)]).with_attribute(
                AFX_NAMESPACE,
                AFX_MODE_INDEX,
                AttributeValue::Integer(mode),
            )
        };
        let layer = MemoryLayer::new(1.0)
            .with_segment(with_mode(1))
            .with_segment(with_mode(1))
            .with_segment(with_mode(2));
        let plan = ctx.plan_layer(&layer).unwrap();
        let delays = plan
            .commands()
            .iter()
            .filter(|c| matches!(c, Command::LongDelay(_)))
            .count();
        assert_eq!(delays, 4);
    }

    #[test]
    fn test_3d_marks_carry_focus() {
        let (_mock, mut ctx) = context();
        ctx.load_correction_file(b"table", 1, 3).unwrap();
        let segment = MemorySegment::new(
            SegmentKind::Polyline,
            vec![Point2D::new(0.0, 0.0), Point2D::new(1.0, 0.0)],
            SegmentProfile {
                focus: 0.5,
                ..profile()
            },
        );
        let layer = MemoryLayer::new(1.0).with_segment(segment);
        let plan = ctx.plan_layer(&layer).unwrap();
        assert!(plan
            .commands()
            .contains(&Command::MarkAbs3d { x: 10_000, y: 0, z: 5000 }));
    }

    #[test]
    fn test_stale_plan_is_rejected() {
        let (_mock, mut ctx) = context();
        let layer = MemoryLayer::new(1.0).with_segment(polyline(&[(0.0, 0.0), (1.0, 0.0)]));
        let plan = ctx.plan_layer(&layer).unwrap();
        ctx.draw_layer(&layer).unwrap();
        assert!(matches!(
            ctx.submit_plan(&plan),
            Err(ScanError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_add_layer_to_open_list() {
        let (mock, mut ctx) = context();
        let layer = MemoryLayer::new(1.0).with_segment(polyline(&[(0.0, 0.0), (1.0, 0.0)]));
        ctx.start_list(1, 0).unwrap();
        ctx.add_layer_to_list(&layer).unwrap();
        ctx.add_layer_to_list(&layer).unwrap();
        // the second pass jumps back to its start
        assert_eq!(
            mock.motion_commands(1)
                .iter()
                .filter(|c| matches!(c, Command::JumpAbs { .. }))
                .count(),
            2
        );
    }
}
