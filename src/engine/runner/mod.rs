//! Async driver of a [`Stack`].
//!
//! The runner owns the bus, the timer and the stack. It waits on whichever
//! comes first between a received frame, a queued [`StackCommand`] and the
//! end of the tick period; frames are processed as they arrive and the tick
//! runs at the configured rate. Producer tasks talk to it through a
//! [`StackHandle`] over a caller-provided [`embassy_sync::channel::Channel`],
//! so the library allocates no task state of its own.
use alloc::vec::Vec;
use core::fmt::Debug;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::{Channel, Sender};
use embassy_time::Duration;
use futures_util::{future::select, future::Either, pin_mut};

use super::platform::{ConfigLayer, NetworkState, Platform};
use super::stack::Stack;
use crate::error::StackError;
use crate::infra::codec::engine::RecordRef;
use crate::protocol::catalog::GroupFunction;
use crate::protocol::managment::address_claiming::ClaimState;
use crate::protocol::managment::node_table::NODES;
use crate::protocol::router::envelope::Envelope;
use crate::protocol::router::handler::{HandlerResult, MessageHandler};
use crate::protocol::router::outbound::{OutboundRequest, SendFlags};
use crate::protocol::timers::{TimerKey, RX_TIMERS, TX_TIMERS};
use crate::protocol::transport::can_frame::CanFrame;
use crate::protocol::transport::traits::can_bus::CanBus;
use crate::protocol::transport::traits::frame_port::FramePort;
use crate::protocol::transport::traits::korri_timer::KorriTimer;

/// Requests queued by producer tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackCommand {
    /// Pack and send a record.
    Send {
        pgn: u32,
        group_function: GroupFunction,
        destination: u8,
        flags: SendFlags,
        fixed: Vec<u8>,
        extras: Vec<u8>,
        extra_count: usize,
    },
    /// ISO request for `pgn`.
    Request { pgn: u32, destination: u8 },
    SetTransmitTimer {
        key: TimerKey,
        destination: u8,
        period: u16,
        start_at: u16,
    },
    SetReceiveTimeout { key: TimerKey, window: u16 },
    EnablePeriodicReports(bool),
    DiscoverNetwork,
    ResetConfiguration(ConfigLayer),
    BusState(NetworkState),
}

#[derive(Debug)]
pub enum RunnerError<E: Debug> {
    Stack(StackError),
    Receive(E),
    Send(E),
}

impl<E: Debug> From<StackError> for RunnerError<E> {
    fn from(error: StackError) -> Self {
        RunnerError::Stack(error)
    }
}

/// Frames the tick hands over, sent once it returns.
#[derive(Default)]
struct TxBuffer(Vec<CanFrame>);

impl FramePort for TxBuffer {
    fn receive(&mut self) -> Option<CanFrame> {
        None
    }

    fn transmit(&mut self, frame: CanFrame) -> Result<(), CanFrame> {
        self.0.push(frame);
        Ok(())
    }
}

enum Wake<E> {
    Tick,
    Frame(Result<CanFrame, E>),
    Command(StackCommand),
}

/// Runs a [`Stack`] of any table capacities; `TX`, `RX` and `N` follow the
/// stack's own parameters.
pub struct StackRunner<
    'a,
    M,
    P,
    C,
    T,
    CM,
    const CAP: usize,
    const TX: usize = TX_TIMERS,
    const RX: usize = RX_TIMERS,
    const N: usize = NODES,
> where
    M: RawMutex,
    P: Platform<M>,
    C: CanBus,
    T: KorriTimer,
    CM: RawMutex,
{
    stack: Stack<M, P, TX, RX, N>,
    bus: C,
    timer: T,
    commands: Option<&'a Channel<CM, StackCommand, CAP>>,
    outgoing: TxBuffer,
}

impl<'a, M, P, C, T, CM, const CAP: usize, const TX: usize, const RX: usize, const N: usize>
    StackRunner<'a, M, P, C, T, CM, CAP, TX, RX, N>
where
    M: RawMutex,
    P: Platform<M>,
    C: CanBus,
    T: KorriTimer,
    CM: RawMutex,
{
    pub fn new(
        stack: Stack<M, P, TX, RX, N>,
        bus: C,
        timer: T,
        commands: Option<&'a Channel<CM, StackCommand, CAP>>,
    ) -> Self {
        Self {
            stack,
            bus,
            timer,
            commands,
            outgoing: TxBuffer::default(),
        }
    }

    /// Handle feeding the command channel, when there is one.
    pub fn handle(&self) -> Option<StackHandle<'a, CM, CAP>> {
        self.commands.map(|channel| StackHandle {
            sender: channel.sender(),
        })
    }

    /// Register handlers and timers before [`drive`](Self::drive).
    pub fn stack_mut(&mut self) -> &mut Stack<M, P, TX, RX, N> {
        &mut self.stack
    }

    /// Claim an address, then run until a fatal error or a bus failure.
    pub async fn drive(mut self) -> Result<(), RunnerError<C::Error>> {
        if self.stack.claim_state() == ClaimState::Idle {
            self.stack.start()?;
        }
        let tick = self.stack.config().tick;
        loop {
            self.wait_tick(tick).await?;
            self.stack.tick(&mut self.outgoing)?;
            for frame in self.outgoing.0.drain(..) {
                self.bus.send(&frame).await.map_err(RunnerError::Send)?;
            }
        }
    }

    /// Serve frames and commands until the tick period is over.
    async fn wait_tick(&mut self, tick: Duration) -> Result<(), RunnerError<C::Error>> {
        let delay = self.timer.delay(tick);
        pin_mut!(delay);
        loop {
            let wake = {
                let recv = self.bus.recv();
                pin_mut!(recv);
                match self.commands {
                    Some(commands) => {
                        let command = commands.receive();
                        pin_mut!(command);
                        match select(delay.as_mut(), select(recv, command)).await {
                            Either::Left(((), _)) => Wake::Tick,
                            Either::Right((Either::Left((frame, _)), _)) => Wake::Frame(frame),
                            Either::Right((Either::Right((command, _)), _)) => Wake::Command(command),
                        }
                    }
                    None => match select(delay.as_mut(), recv).await {
                        Either::Left(((), _)) => Wake::Tick,
                        Either::Right((frame, _)) => Wake::Frame(frame),
                    },
                }
            };

            match wake {
                Wake::Tick => return Ok(()),
                Wake::Frame(frame) => {
                    let frame = frame.map_err(RunnerError::Receive)?;
                    self.stack.receive(&frame)?;
                }
                Wake::Command(command) => apply(&mut self.stack, command)?,
            }
        }
    }
}

/// Run one command. Only fatal errors escape; the rest go to the platform.
fn apply<M, P, const TX: usize, const RX: usize, const N: usize>(
    stack: &mut Stack<M, P, TX, RX, N>,
    command: StackCommand,
) -> Result<(), StackError>
where
    M: RawMutex,
    P: Platform<M>,
{
    let result = match command {
        StackCommand::Send {
            pgn,
            group_function,
            destination,
            flags,
            fixed,
            extras,
            extra_count,
        } => {
            let request = OutboundRequest {
                pgn,
                group_function,
                destination,
                record: RecordRef::with_extras(&fixed, &extras, extra_count),
                flags,
            };
            stack.send(&request).map_err(StackError::from)
        }
        StackCommand::Request { pgn, destination } => stack.send_request(pgn, destination).map_err(StackError::from),
        StackCommand::SetTransmitTimer {
            key,
            destination,
            period,
            start_at,
        } => stack.set_transmit_timer(key, destination, period, start_at),
        StackCommand::SetReceiveTimeout { key, window } => stack.set_receive_timeout(key, window),
        StackCommand::EnablePeriodicReports(enabled) => {
            stack.enable_periodic_reports(enabled);
            Ok(())
        }
        StackCommand::DiscoverNetwork => stack.discover_network().map_err(StackError::from),
        StackCommand::ResetConfiguration(layer) => stack.reset_configuration(layer),
        StackCommand::BusState(state) => {
            stack.report_bus_state(state);
            Ok(())
        }
    };
    match result {
        Err(error) if !error.is_fatal() => {
            #[cfg(feature = "defmt")]
            defmt::warn!("runner: command failed: {}", defmt::Debug2Format(&error));
            stack.platform_mut().report_error(error);
            Ok(())
        }
        other => other,
    }
}

/// Producer side of the command channel.
pub struct StackHandle<'a, CM: RawMutex, const CAP: usize> {
    sender: Sender<'a, CM, StackCommand, CAP>,
}

impl<'a, CM: RawMutex, const CAP: usize> StackHandle<'a, CM, CAP> {
    pub fn new(channel: &'a Channel<CM, StackCommand, CAP>) -> Self {
        Self {
            sender: channel.sender(),
        }
    }

    /// Queue `request`; the record is copied.
    pub async fn send(&self, request: &OutboundRequest<'_>) {
        let command = StackCommand::Send {
            pgn: request.pgn,
            group_function: request.group_function,
            destination: request.destination,
            flags: request.flags,
            fixed: request.record.fixed.to_vec(),
            extras: request.record.extras.to_vec(),
            extra_count: request.record.extra_count,
        };
        self.sender.send(command).await;
    }

    pub async fn request(&self, pgn: u32, destination: u8) {
        self.sender.send(StackCommand::Request { pgn, destination }).await;
    }

    pub async fn set_transmit_timer(&self, key: TimerKey, destination: u8, period: u16, start_at: u16) {
        let command = StackCommand::SetTransmitTimer {
            key,
            destination,
            period,
            start_at,
        };
        self.sender.send(command).await;
    }

    pub async fn set_receive_timeout(&self, key: TimerKey, window: u16) {
        self.sender.send(StackCommand::SetReceiveTimeout { key, window }).await;
    }

    pub async fn enable_periodic_reports(&self, enabled: bool) {
        self.sender.send(StackCommand::EnablePeriodicReports(enabled)).await;
    }

    pub async fn discover_network(&self) {
        self.sender.send(StackCommand::DiscoverNetwork).await;
    }

    pub async fn reset_configuration(&self, layer: ConfigLayer) {
        self.sender.send(StackCommand::ResetConfiguration(layer)).await;
    }

    pub async fn report_bus_state(&self, state: NetworkState) {
        self.sender.send(StackCommand::BusState(state)).await;
    }

    /// Queue without waiting. Hands the command back when the channel is full.
    pub fn try_command(&self, command: StackCommand) -> Result<(), StackCommand> {
        self.sender.try_send(command).map_err(|embassy_sync::channel::TrySendError::Full(command)| command)
    }
}

/// Fallback handler copying every otherwise unhandled envelope into
/// `channel`. A full channel leaves the message unhandled.
pub fn forward_into<M, CM, const CAP: usize>(channel: &'static Channel<CM, Envelope<M>, CAP>) -> impl MessageHandler<M>
where
    M: RawMutex,
    CM: RawMutex,
{
    move |envelope: &Envelope<M>| match channel.try_send(envelope.retain()) {
        Ok(()) => HandlerResult::Handled,
        Err(_) => HandlerResult::Unhandled,
    }
}
