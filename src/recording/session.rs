//! Recording sessions: channel setup, trigger programming, ring draining and
//! export.
//!
//! A session samples up to eight signals of one card while a list executes.
//! The card writes samples into a wrap-around ring; the session follows the
//! ring's write position and copies every completed block into the channel
//! chunks before the card can overwrite it.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::channel::{normalize_channel_name, ChannelType, RecordingChannel};
use super::data_table::DataTable;
use crate::capabilities::CardCapabilities;
use crate::card::{CardHandle, CardRegistry};
use crate::error::{ScanError, ScanResult};
use crate::hardware::{Command, RtcTransport};
use crate::limits::{validate_chunk_size, DEFAULT_CHUNK_SIZE, DRAIN_BLOCK_SIZE, RECORDING_CHANNEL_COUNT};
use crate::poll::PollControl;

/// Wait before the trigger is switched off, in 10 µs ticks.
pub const DISABLE_DRAIN_DELAY: u32 = 1200;

/// Per-session recording options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingOptions {
    /// Samples per chunk, 1024 to 1Mi
    pub chunk_size: usize,
    /// Allow sampling of the raw head position signals
    pub enable_head_feedback: bool,
    /// Upload the head transform so raw positions can be converted back
    pub enable_backtransformation: bool,
    /// Scan head used for the transform and the connection check
    pub head: u32,
    /// Refuse to record while the scan head reports itself disconnected
    pub scanhead_connection_check: bool,
}

impl Default for RecordingOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            enable_head_feedback: false,
            enable_backtransformation: false,
            head: 1,
            scanhead_connection_check: true,
        }
    }
}

/// Sample rates the trigger supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordingFrequency {
    /// 100 kHz
    Khz100,
    /// 50 kHz
    Khz50,
    /// 25 kHz
    Khz25,
    /// 20 kHz
    Khz20,
    /// 12.5 kHz
    Khz12_5,
    /// 10 kHz
    Khz10,
    /// 5 kHz
    Khz5,
    /// 2.5 kHz
    Khz2_5,
    /// 1 kHz
    Khz1,
}

impl RecordingFrequency {
    /// Every preset, fastest first.
    pub const ALL: [RecordingFrequency; 9] = [
        RecordingFrequency::Khz100,
        RecordingFrequency::Khz50,
        RecordingFrequency::Khz25,
        RecordingFrequency::Khz20,
        RecordingFrequency::Khz12_5,
        RecordingFrequency::Khz10,
        RecordingFrequency::Khz5,
        RecordingFrequency::Khz2_5,
        RecordingFrequency::Khz1,
    ];

    /// Trigger period in 10 µs clock ticks.
    pub fn period(self) -> u32 {
        match self {
            RecordingFrequency::Khz100 => 1,
            RecordingFrequency::Khz50 => 2,
            RecordingFrequency::Khz25 => 4,
            RecordingFrequency::Khz20 => 5,
            RecordingFrequency::Khz12_5 => 8,
            RecordingFrequency::Khz10 => 10,
            RecordingFrequency::Khz5 => 20,
            RecordingFrequency::Khz2_5 => 40,
            RecordingFrequency::Khz1 => 100,
        }
    }

    /// Sample rate in Hz.
    pub fn hertz(self) -> u32 {
        100_000 / self.period()
    }
}

/// Telemetry capture on one card.
pub struct RecordingSession {
    id: Uuid,
    created_at: DateTime<Utc>,
    transport: Arc<dyn RtcTransport>,
    cards: Arc<CardRegistry>,
    handle: CardHandle,
    options: RecordingOptions,
    xy_factor: f64,
    z_factor: f64,
    channels: Vec<RecordingChannel>,
    frequency: Option<RecordingFrequency>,
    poll: PollControl,
}

impl fmt::Debug for RecordingSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingSession")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .field("handle", &self.handle)
            .field("options", &self.options)
            .field("channels", &self.channels.len())
            .field("frequency", &self.frequency)
            .finish_non_exhaustive()
    }
}

impl RecordingSession {
    /// Create a session on the card behind `handle`.
    ///
    /// With backtransformation enabled the head transform is uploaded here,
    /// once per session.
    pub fn new(
        transport: Arc<dyn RtcTransport>,
        cards: Arc<CardRegistry>,
        handle: CardHandle,
        capabilities: &CardCapabilities,
        xy_factor: f64,
        z_factor: f64,
        options: RecordingOptions,
    ) -> ScanResult<Self> {
        let options = RecordingOptions {
            chunk_size: validate_chunk_size(options.chunk_size)?,
            ..options
        };
        let card_no = cards.card_no(handle)?;

        if options.enable_backtransformation {
            if !capabilities.supports_backtransformation {
                return Err(ScanError::NotSupported("backtransformation"));
            }
            let code = transport.upload_transform(card_no, options.head);
            if code != 0 {
                return Err(ScanError::CardError { card: card_no, code });
            }
            transport.check(card_no)?;
        }

        let session = Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            transport,
            cards,
            handle,
            options,
            xy_factor,
            z_factor,
            channels: Vec::new(),
            frequency: None,
            poll: PollControl::default(),
        };
        info!(id = %session.id, card = card_no, ?options, "recording session created");
        Ok(session)
    }

    /// Use `poll` for the drain loop.
    pub fn with_poll_control(mut self, poll: PollControl) -> Self {
        self.poll = poll;
        self
    }

    /// Id the session is kept under.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Creation time, UTC.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Options the session was created with.
    pub fn options(&self) -> &RecordingOptions {
        &self.options
    }

    /// Whether recording refuses to start on a disconnected head.
    pub fn scanhead_connection_check_is_enabled(&self) -> bool {
        self.options.scanhead_connection_check
    }

    /// Turn the scan head check before `execute_list_with_recording` on or off.
    pub fn set_scanhead_connection_check(&mut self, enabled: bool) {
        self.options.scanhead_connection_check = enabled;
    }

    /// Sample rate programmed by the last `enable_recording`.
    pub fn frequency(&self) -> Option<RecordingFrequency> {
        self.frequency
    }

    // =========================================================================
    // Channels
    // =========================================================================

    /// Add a channel and return the hardware channel it was given.
    pub fn add_channel(&mut self, name: &str, channel_type: ChannelType) -> ScanResult<u32> {
        let name = normalize_channel_name(name)?;
        if channel_type.requires_head_feedback() && !self.options.enable_head_feedback {
            return Err(ScanError::RawPositionFeedbackDisabled(channel_type));
        }
        if self.channels.iter().any(|channel| channel.name() == name) {
            return Err(ScanError::DuplicateChannelName(name));
        }
        if self.channels.iter().any(|channel| channel.channel_type() == channel_type) {
            return Err(ScanError::ChannelTypeAlreadyRecorded(channel_type));
        }
        let channel_id = (1..=RECORDING_CHANNEL_COUNT)
            .find(|id| self.channels.iter().all(|channel| channel.channel_id() != *id))
            .ok_or(ScanError::NoChannelAvailable)?;

        let channel = RecordingChannel::new(name, channel_id, channel_type, self.options.chunk_size)?;
        debug!(name = channel.name(), channel_id, %channel_type, "recording channel added");
        self.channels.push(channel);
        Ok(channel_id)
    }

    /// Remove a channel; its hardware channel becomes free again.
    pub fn remove_channel(&mut self, name: &str) -> ScanResult<()> {
        let name = normalize_channel_name(name)?;
        let index = self
            .channels
            .iter()
            .position(|channel| channel.name() == name)
            .ok_or(ScanError::ChannelNotFound(name))?;
        self.channels.remove(index);
        Ok(())
    }

    /// Whether a channel named `name` exists.
    pub fn has_channel(&self, name: &str) -> bool {
        self.channel(name).is_ok()
    }

    /// Channel added under `name`.
    pub fn channel(&self, name: &str) -> ScanResult<&RecordingChannel> {
        let name = normalize_channel_name(name)?;
        self.channels
            .iter()
            .find(|channel| channel.name() == name)
            .ok_or(ScanError::ChannelNotFound(name))
    }

    /// Signal recorded by the channel `name`.
    pub fn channel_type(&self, name: &str) -> ScanResult<ChannelType> {
        Ok(self.channel(name)?.channel_type())
    }

    /// Channels in the order they were added.
    pub fn channels(&self) -> &[RecordingChannel] {
        &self.channels
    }

    /// Remove every channel.
    pub fn clear(&mut self) {
        self.channels.clear();
    }

    /// Drop the samples of every channel, keeping the channels.
    pub fn clear_records(&mut self) {
        for channel in &mut self.channels {
            channel.clear();
        }
    }

    // =========================================================================
    // Record access
    // =========================================================================

    /// Samples stored by the channel `name`.
    pub fn channel_record_count(&self, name: &str) -> ScanResult<u64> {
        Ok(self.channel(name)?.record_count())
    }

    /// Raw value of record `index`.
    pub fn channel_value(&self, name: &str, index: u64) -> ScanResult<i32> {
        self.channel(name)?.record(index)
    }

    /// Copy all records of a channel into `buffer`; returns how many were copied.
    pub fn channel_values(&self, name: &str, buffer: &mut [i32]) -> ScanResult<usize> {
        self.channel(name)?.copy_all(buffer)
    }

    // =========================================================================
    // Trigger
    // =========================================================================

    /// Program the trigger to sample every channel at `frequency`.
    pub fn enable_recording(&mut self, frequency: RecordingFrequency) -> ScanResult<()> {
        let mut signals = [0u32; RECORDING_CHANNEL_COUNT as usize];
        for channel in &self.channels {
            signals[(channel.channel_id() - 1) as usize] = channel.channel_type().signal_code();
        }
        self.emit(&[Command::SetTrigger {
            period: frequency.period(),
            signals,
        }])?;
        self.frequency = Some(frequency);
        info!(id = %self.id, hz = frequency.hertz(), channels = self.channels.len(), "recording enabled");
        Ok(())
    }

    /// Let the last samples settle, then stop the trigger.
    pub fn disable_recording(&mut self) -> ScanResult<()> {
        self.emit(&[
            Command::LongDelay(DISABLE_DRAIN_DELAY),
            Command::SetTrigger {
                period: 0,
                signals: [0; RECORDING_CHANNEL_COUNT as usize],
            },
        ])?;
        self.frequency = None;
        Ok(())
    }

    // =========================================================================
    // Execution
    // =========================================================================

    /// Execute the ended list `list` and drain the sample ring until both the
    /// list and the measurement are finished.
    ///
    /// Returns the number of samples drained per channel.
    pub fn execute_list_with_recording(&mut self, list: u32) -> ScanResult<u64> {
        let card_no = self.cards.card_no(self.handle)?;
        if self.options.scanhead_connection_check {
            let head = self.transport.head_status(card_no, self.options.head);
            if !head.is_connected() {
                return Err(ScanError::ScanheadNotConnected {
                    head: self.options.head,
                    status: head.raw,
                });
            }
        }
        self.cards.with_card(self.handle, |card| card.list.execute(list))?;
        if let Err(err) = self
            .transport
            .submit_checked(card_no, &Command::ExecuteList { list, position: 0 })
        {
            warn!(error = %err, "list execution failed, resetting list state");
            self.cards.with_card(self.handle, |card| {
                card.list.reset();
                Ok(())
            })?;
            return Err(err);
        }

        let drained = self.drain_ring(card_no)?;
        self.cards.with_card(self.handle, |card| card.list.complete())?;
        info!(id = %self.id, card = card_no, samples = drained, "recording drained");
        Ok(drained)
    }

    fn drain_ring(&mut self, card_no: u32) -> ScanResult<u64> {
        let ring = self.transport.measurement_ring_size();
        let block = DRAIN_BLOCK_SIZE.min((ring / 4).max(1));
        let poll = self.poll.clone();
        let timer = poll.start();

        loop {
            if self.transport.measurement_status(card_no).has_started() {
                break;
            }
            if !self.transport.status(card_no).is_busy() {
                debug!(card = card_no, "list finished without sampling");
                return Ok(0);
            }
            timer.wait()?;
        }

        let mut last: u32 = 0;
        let mut drained: u64 = 0;
        loop {
            let list_busy = self.transport.status(card_no).is_busy();
            let measurement = self.transport.measurement_status(card_no);
            let position = measurement.position;

            if u64::from(position) > u64::from(last) + u64::from(block) {
                drained += self.drain_block(card_no, last, last + block)?;
                last += block;
            } else if position < last {
                drained += self.drain_block(card_no, last, ring)?;
                last = 0;
            } else if !measurement.busy {
                drained += self.drain_block(card_no, last, position)?;
                last = position;
            }

            if !list_busy && !measurement.busy && position == last {
                break;
            }
            timer.wait()?;
        }
        Ok(drained)
    }

    /// Copy ring slots `from..to` of every channel into its chunks.
    ///
    /// Every channel is read before any is appended, so a failed read leaves
    /// all record counts untouched.
    fn drain_block(&mut self, card_no: u32, from: u32, to: u32) -> ScanResult<u64> {
        if to <= from {
            return Ok(0);
        }
        debug!(card = card_no, from, to, "draining sample block");
        let len = (to - from) as usize;
        let mut blocks = Vec::with_capacity(self.channels.len());
        for channel in &self.channels {
            let mut values = vec![0; len];
            self.transport
                .read_waveform(card_no, channel.channel_id(), from, &mut values);
            blocks.push(values);
        }
        self.transport.check(card_no)?;

        for (channel, values) in self.channels.iter_mut().zip(&blocks) {
            channel.append(values)?;
        }
        Ok(u64::from(to - from))
    }

    // =========================================================================
    // Export
    // =========================================================================

    /// Add the raw records of a channel as an integer column.
    pub fn add_records_to_table(
        &self,
        name: &str,
        table: &mut dyn DataTable,
        column: &str,
        description: &str,
    ) -> ScanResult<()> {
        table.add_int32_column(column, description, self.channel(name)?.values())
    }

    /// Add `value * scale + offset` of a channel as a floating point column.
    pub fn add_scaled_records_to_table(
        &self,
        name: &str,
        table: &mut dyn DataTable,
        column: &str,
        description: &str,
        scale: f64,
        offset: f64,
    ) -> ScanResult<()> {
        table.add_double_column(column, description, self.channel(name)?.scaled(scale, offset))
    }

    /// Add head positions in millimeters, recovered from the raw X/Y feedback.
    pub fn add_backtransformed_xy_to_table(
        &self,
        table: &mut dyn DataTable,
        column_x: &str,
        column_y: &str,
    ) -> ScanResult<()> {
        let positions = self.backtransformed(false)?;
        let xs = positions.iter().map(|p| f64::from(p[0]) / self.xy_factor).collect();
        let ys = positions.iter().map(|p| f64::from(p[1]) / self.xy_factor).collect();
        table.add_double_column(column_x, "backtransformed X position in mm", xs)?;
        table.add_double_column(column_y, "backtransformed Y position in mm", ys)
    }

    /// Add the head Z position in millimeters, recovered from raw X/Y/Z feedback.
    pub fn add_backtransformed_z_to_table(&self, table: &mut dyn DataTable, column: &str) -> ScanResult<()> {
        let positions = self.backtransformed(true)?;
        let zs = positions.iter().map(|p| f64::from(p[2]) / self.z_factor).collect();
        table.add_double_column(column, "backtransformed Z position in mm", zs)
    }

    /// Add the commanded X/Y positions in millimeters.
    pub fn add_target_xy_to_table(
        &self,
        table: &mut dyn DataTable,
        column_x: &str,
        column_y: &str,
    ) -> ScanResult<()> {
        let x = self.channel_of_type(ChannelType::TargetX)?;
        let y = self.channel_of_type(ChannelType::TargetY)?;
        table.add_double_column(column_x, "target X position in mm", x.scaled(1.0 / self.xy_factor, 0.0))?;
        table.add_double_column(column_y, "target Y position in mm", y.scaled(1.0 / self.xy_factor, 0.0))
    }

    fn backtransformed(&self, with_z: bool) -> ScanResult<Vec<[i32; 3]>> {
        if !self.options.enable_backtransformation {
            return Err(ScanError::BacktransformationNotEnabled);
        }
        let x = self.channel_of_type(ChannelType::CurrentXRaw)?.values();
        let y = self.channel_of_type(ChannelType::CurrentYRaw)?.values();
        let z = if with_z {
            Some(self.channel_of_type(ChannelType::CurrentZRaw)?.values())
        } else {
            self.channel_of_type(ChannelType::CurrentZRaw)
                .ok()
                .map(RecordingChannel::values)
        };
        let card_no = self.cards.card_no(self.handle)?;
        let head = self.options.head;

        let count = x.len().min(y.len());
        let positions = (0..count)
            .map(|i| {
                let raw_z = z.as_ref().and_then(|z| z.get(i).copied()).unwrap_or(0);
                self.transport.transform(card_no, head, [x[i], y[i], raw_z])
            })
            .collect();
        self.transport.check(card_no)?;
        Ok(positions)
    }

    fn channel_of_type(&self, channel_type: ChannelType) -> ScanResult<&RecordingChannel> {
        self.channels
            .iter()
            .find(|channel| channel.channel_type() == channel_type)
            .ok_or(ScanError::ChannelTypeNotRecorded(channel_type))
    }

    fn emit(&self, commands: &[Command]) -> ScanResult<()> {
        let count = commands.iter().filter(|command| command.is_list_command()).count() as u32;
        let card_no = self.cards.with_card(self.handle, |card| {
            card.list.reserve(count)?;
            Ok(card.card_no)
        })?;
        for command in commands {
            self.transport.submit_checked(card_no, command)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::card::CardRecord;
    use crate::hardware::MockTransport;
    use crate::recording::{ColumnValues, MemoryDataTable};

    struct Fixture {
        mock: Arc<MockTransport>,
        cards: Arc<CardRegistry>,
        handle: CardHandle,
        card_no: u32,
    }

    fn fixture(mock: MockTransport) -> Fixture {
        let mock = Arc::new(mock);
        let card_no = mock.add_card(77);
        let cards = CardRegistry::new();
        let handle = cards.insert(CardRecord::new(card_no, 77, 1 << 20));
        Fixture {
            mock,
            cards,
            handle,
            card_no,
        }
    }

    fn session(f: &Fixture, options: RecordingOptions) -> ScanResult<RecordingSession> {
        RecordingSession::new(
            f.mock.clone(),
            f.cards.clone(),
            f.handle,
            &CardCapabilities::rtc6(),
            10_000.0,
            10_000.0,
            options,
        )
        .map(|s| s.with_poll_control(PollControl::new(Duration::ZERO).with_timeout(Duration::from_secs(5))))
    }

    fn options_with_feedback() -> RecordingOptions {
        RecordingOptions {
            chunk_size: 1024,
            enable_head_feedback: true,
            enable_backtransformation: true,
            ..RecordingOptions::default()
        }
    }

    fn end_list(f: &Fixture) {
        f.cards
            .with_card(f.handle, |card| {
                card.list.start(1, 0)?;
                card.list.end()
            })
            .unwrap();
    }

    #[test]
    fn test_channel_ids_are_reused() {
        let f = fixture(MockTransport::new());
        let mut s = session(&f, RecordingOptions::default()).unwrap();
        for n in 0..8 {
            assert_eq!(s.add_channel(&format!("v{n}"), ChannelType::FreeVariable(n)).unwrap(), n + 1);
        }
        assert!(matches!(
            s.add_channel("extra", ChannelType::LaserOn),
            Err(ScanError::NoChannelAvailable)
        ));
        s.remove_channel("V3").unwrap();
        assert_eq!(s.add_channel("laser", ChannelType::LaserOn).unwrap(), 4);
    }

    #[test]
    fn test_channel_rules() {
        let f = fixture(MockTransport::new());
        let mut s = session(&f, RecordingOptions::default()).unwrap();
        s.add_channel("X", ChannelType::TargetX).unwrap();
        assert!(s.has_channel("x"));
        assert!(matches!(
            s.add_channel("x", ChannelType::TargetY),
            Err(ScanError::DuplicateChannelName(_))
        ));
        assert!(matches!(
            s.add_channel("x2", ChannelType::TargetX),
            Err(ScanError::ChannelTypeAlreadyRecorded(ChannelType::TargetX))
        ));
        assert!(matches!(
            s.add_channel("raw", ChannelType::CurrentXRaw),
            Err(ScanError::RawPositionFeedbackDisabled(_))
        ));
        assert!(matches!(s.remove_channel("y"), Err(ScanError::ChannelNotFound(_))));
        s.clear();
        assert!(s.channels().is_empty());
    }

    #[test]
    fn test_chunk_size_validated() {
        let f = fixture(MockTransport::new());
        let options = RecordingOptions {
            chunk_size: 10,
            ..RecordingOptions::default()
        };
        assert!(matches!(session(&f, options), Err(ScanError::InvalidChunkSize(10))));
    }

    #[test]
    fn test_backtransformation_uploads_transform() {
        let f = fixture(MockTransport::new());
        session(&f, options_with_feedback()).unwrap();
        assert!(f.mock.transform_uploaded(f.card_no));

        let rtc5 = RecordingSession::new(
            f.mock.clone(),
            f.cards.clone(),
            f.handle,
            &CardCapabilities::rtc5(),
            10_000.0,
            625.0,
            options_with_feedback(),
        );
        assert!(matches!(rtc5, Err(ScanError::NotSupported(_))));
    }

    #[test]
    fn test_enable_and_disable_trigger() {
        let f = fixture(MockTransport::new());
        let mut s = session(&f, RecordingOptions::default()).unwrap();
        s.add_channel("laser", ChannelType::LaserOn).unwrap();
        s.add_channel("tx", ChannelType::TargetX).unwrap();
        s.enable_recording(RecordingFrequency::Khz12_5).unwrap();
        s.disable_recording().unwrap();
        assert_eq!(
            f.mock.commands(f.card_no),
            vec![
                Command::SetTrigger {
                    period: 8,
                    signals: [0, 7, 0, 0, 0, 0, 0, 0]
                },
                Command::LongDelay(DISABLE_DRAIN_DELAY),
                Command::SetTrigger {
                    period: 0,
                    signals: [0; 8]
                },
            ]
        );
        assert!(s.frequency().is_none());
    }

    #[test]
    fn test_drain_follows_wrapping_ring() {
        let mock = MockTransport::new().with_ring_size(1000);
        let f = fixture(mock);
        f.mock.set_measurement_plan(2500, 200);
        let mut s = session(&f, RecordingOptions::default()).unwrap();
        s.add_channel("tx", ChannelType::TargetX).unwrap();
        s.add_channel("ty", ChannelType::TargetY).unwrap();
        end_list(&f);

        assert_eq!(s.execute_list_with_recording(1).unwrap(), 2500);
        assert_eq!(s.channel_record_count("tx").unwrap(), 2500);
        let tx = s.channel("tx").unwrap();
        for index in 0..2500u64 {
            assert_eq!(tx.record(index).unwrap(), MockTransport::sample_value(1, index));
        }
        assert_eq!(s.channel_value("ty", 2499).unwrap(), MockTransport::sample_value(2, 2499));
        assert_eq!(
            f.cards.with_card(f.handle, |card| Ok(card.list.state())).unwrap(),
            crate::command_list::ListState::Idle
        );
    }

    #[test]
    fn test_execute_requires_ended_list() {
        let f = fixture(MockTransport::new());
        let mut s = session(&f, RecordingOptions::default()).unwrap();
        assert!(matches!(
            s.execute_list_with_recording(1),
            Err(ScanError::ListStateViolation { .. })
        ));
    }

    #[test]
    fn test_exports() {
        let mock = MockTransport::new().with_ring_size(1000);
        let f = fixture(mock);
        f.mock.set_measurement_plan(10, 10);
        let mut s = session(&f, options_with_feedback()).unwrap();
        s.add_channel("rx", ChannelType::CurrentXRaw).unwrap();
        s.add_channel("ry", ChannelType::CurrentYRaw).unwrap();
        s.add_channel("tx", ChannelType::TargetX).unwrap();
        s.add_channel("ty", ChannelType::TargetY).unwrap();
        end_list(&f);
        s.execute_list_with_recording(1).unwrap();

        let mut table = MemoryDataTable::new();
        s.add_records_to_table("rx", &mut table, "raw_x", "raw X").unwrap();
        s.add_scaled_records_to_table("rx", &mut table, "scaled_x", "", 2.0, 1.0).unwrap();
        s.add_backtransformed_xy_to_table(&mut table, "x_mm", "y_mm").unwrap();
        s.add_target_xy_to_table(&mut table, "tx_mm", "ty_mm").unwrap();
        assert_eq!(table.row_count(), 10);

        let raw = MockTransport::sample_value(1, 3);
        assert_eq!(table.column("raw_x").unwrap().values, ColumnValues::Int32(s.channel("rx").unwrap().values()));
        match &table.column("x_mm").unwrap().values {
            ColumnValues::Double(values) => assert_eq!(values[3], f64::from(raw) / 10_000.0),
            other => panic!("unexpected column {other:?}"),
        }
        assert!(matches!(
            s.add_backtransformed_z_to_table(&mut table, "z_mm"),
            Err(ScanError::ChannelTypeNotRecorded(ChannelType::CurrentZRaw))
        ));

        let mut buffer = vec![0; 4];
        assert!(matches!(
            s.channel_values("rx", &mut buffer),
            Err(ScanError::BufferTooSmall { required: 10, provided: 4 })
        ));
    }

    #[test]
    fn test_backtransformation_requires_option() {
        let f = fixture(MockTransport::new());
        let options = RecordingOptions {
            enable_head_feedback: true,
            ..RecordingOptions::default()
        };
        let mut s = session(&f, options).unwrap();
        s.add_channel("rx", ChannelType::CurrentXRaw).unwrap();
        let mut table = MemoryDataTable::new();
        assert!(matches!(
            s.add_backtransformed_xy_to_table(&mut table, "x", "y"),
            Err(ScanError::BacktransformationNotEnabled)
        ));
        assert!(!f.mock.transform_uploaded(f.card_no));
    }

    #[test]
    fn test_failed_read_keeps_record_counts() {
        let f = fixture(MockTransport::new());
        f.mock.set_measurement_plan(300, 100);
        let mut s = session(&f, RecordingOptions::default()).unwrap();
        s.add_channel("laser", ChannelType::LaserOn).unwrap();
        s.add_channel("tx", ChannelType::TargetX).unwrap();
        end_list(&f);
        f.mock.inject_waveform_error(f.card_no, 0x40);

        assert!(matches!(
            s.execute_list_with_recording(1),
            Err(ScanError::CardError { code: 0x40, .. })
        ));
        assert_eq!(s.channel_record_count("laser").unwrap(), 0);
        assert_eq!(s.channel_record_count("tx").unwrap(), 0);
    }

    #[test]
    fn test_disconnected_head_blocks_recording() {
        let f = fixture(MockTransport::new());
        f.mock.set_measurement_plan(50, 50);
        let mut s = session(&f, RecordingOptions::default()).unwrap();
        assert!(s.scanhead_connection_check_is_enabled());
        s.add_channel("laser", ChannelType::LaserOn).unwrap();
        end_list(&f);
        f.mock.set_head_status(f.card_no, 0);

        assert!(matches!(
            s.execute_list_with_recording(1),
            Err(ScanError::ScanheadNotConnected { head: 1, status: 0 })
        ));
        assert!(!f
            .mock
            .commands(f.card_no)
            .iter()
            .any(|c| matches!(c, Command::ExecuteList { .. })));

        s.set_scanhead_connection_check(false);
        assert!(!s.scanhead_connection_check_is_enabled());
        assert_eq!(s.execute_list_with_recording(1).unwrap(), 50);
    }
}
