//! Typed device operations.
//!
//! Thin wrappers that build the wire envelope for one operation, submit it,
//! and hand back the acknowledgement. Parameter validation happens in the
//! builder, so an out-of-range value fails before anything is queued.

use std::sync::Arc;

use tanklink_proto::{
    CommandBuilder, Device, DhwMode, EnergyUsageReport, ReservationEntry, ReservationSchedule,
    TouPeriod,
};

use crate::error::CommandError;
use crate::session::{CommandAck, Session};
use crate::snapshot::DeviceSnapshot;

impl Session {
    fn builder<'a>(&'a self, device: &'a Device) -> CommandBuilder<'a> {
        CommandBuilder::new(self.client_id(), self.session_id(), device)
    }

    /// Ask the device for a full status payload and return the snapshot it
    /// produced. The same payload also flows through the event bus.
    pub async fn request_status(
        &self,
        device: &Device,
    ) -> Result<Arc<DeviceSnapshot>, CommandError> {
        let envelope = self.builder(device).status_request();
        let ack = self.submit(envelope).await?;
        ack.snapshot.ok_or(CommandError::EmptyResponse)
    }

    /// Ask the device for its feature/capability payload.
    pub async fn request_device_info(
        &self,
        device: &Device,
    ) -> Result<Arc<DeviceSnapshot>, CommandError> {
        let envelope = self.builder(device).device_info_request();
        let ack = self.submit(envelope).await?;
        ack.snapshot.ok_or(CommandError::EmptyResponse)
    }

    /// Query daily energy-usage history for the given months of `year`.
    pub async fn request_energy_usage(
        &self,
        device: &Device,
        year: u16,
        months: Vec<u8>,
    ) -> Result<EnergyUsageReport, CommandError> {
        let envelope = self.builder(device).energy_usage(year, months)?;
        let ack = self.submit(envelope).await?;
        ack.energy.ok_or(CommandError::EmptyResponse)
    }

    pub async fn set_power(&self, device: &Device, on: bool) -> Result<CommandAck, CommandError> {
        let envelope = self.builder(device).power(on);
        self.submit(envelope).await
    }

    /// Select a DHW operation mode. Vacation requires a duration in days.
    pub async fn set_dhw_mode(
        &self,
        device: &Device,
        mode: DhwMode,
        vacation_days: Option<u16>,
    ) -> Result<CommandAck, CommandError> {
        let envelope = self.builder(device).dhw_mode(mode, vacation_days)?;
        self.submit(envelope).await
    }

    /// Set the tank setpoint in °F (95..=150).
    pub async fn set_dhw_temperature(
        &self,
        device: &Device,
        fahrenheit: f64,
    ) -> Result<CommandAck, CommandError> {
        let envelope = self.builder(device).dhw_temperature(fahrenheit)?;
        self.submit(envelope).await
    }

    /// Adjust an active vacation's remaining duration, 1..=365 days.
    pub async fn set_vacation_days(
        &self,
        device: &Device,
        days: u16,
    ) -> Result<CommandAck, CommandError> {
        let envelope = self.builder(device).vacation_days(days)?;
        self.submit(envelope).await
    }

    /// Enable the anti-legionella cycle with a period in days (1..=30), or
    /// disable it with `None`.
    pub async fn set_anti_legionella(
        &self,
        device: &Device,
        period_days: Option<u8>,
    ) -> Result<CommandAck, CommandError> {
        let envelope = self.builder(device).anti_legionella(period_days)?;
        self.submit(envelope).await
    }

    /// Opt the unit in or out of utility demand-response events.
    pub async fn set_demand_response(
        &self,
        device: &Device,
        enrolled: bool,
    ) -> Result<CommandAck, CommandError> {
        let envelope = self.builder(device).demand_response(enrolled);
        self.submit(envelope).await
    }

    /// Acknowledge an air-filter service and restart its elapsed counter.
    pub async fn reset_air_filter(&self, device: &Device) -> Result<CommandAck, CommandError> {
        let envelope = self.builder(device).air_filter_reset();
        self.submit(envelope).await
    }

    pub async fn set_tou_enabled(
        &self,
        device: &Device,
        enabled: bool,
    ) -> Result<CommandAck, CommandError> {
        let envelope = self.builder(device).tou_enabled(enabled);
        self.submit(envelope).await
    }

    /// Write the time-of-use schedule registered under `controller_serial`.
    pub async fn set_tou_schedule(
        &self,
        device: &Device,
        controller_serial: &str,
        periods: Vec<TouPeriod>,
        enabled: bool,
    ) -> Result<CommandAck, CommandError> {
        let envelope = self
            .builder(device)
            .tou_schedule(controller_serial, periods, enabled)?;
        self.submit(envelope).await
    }

    /// Select recirculation mode 1..=4.
    pub async fn set_recirculation_mode(
        &self,
        device: &Device,
        mode: u8,
    ) -> Result<CommandAck, CommandError> {
        let envelope = self.builder(device).recirculation_mode(mode)?;
        self.submit(envelope).await
    }

    /// One-shot recirculation, like pressing the hot button on the panel.
    pub async fn trigger_recirculation(&self, device: &Device) -> Result<CommandAck, CommandError> {
        let envelope = self.builder(device).recirculation_hot_button();
        self.submit(envelope).await
    }

    /// Fetch the weekly reservation program the device has stored.
    pub async fn read_reservations(
        &self,
        device: &Device,
    ) -> Result<ReservationSchedule, CommandError> {
        let envelope = self.builder(device).reservation_read();
        let ack = self.submit(envelope).await?;
        ack.reservations.ok_or(CommandError::EmptyResponse)
    }

    /// Replace the weekly reservation program.
    pub async fn update_reservations(
        &self,
        device: &Device,
        enabled: bool,
        entries: Vec<ReservationEntry>,
    ) -> Result<CommandAck, CommandError> {
        let envelope = self.builder(device).reservation_update(enabled, entries)?;
        self.submit(envelope).await
    }
}
