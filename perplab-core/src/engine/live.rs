//! Live order routing with a protective-stop guarantee.
//!
//! A filled entry without a resting stop is an unbounded leveraged risk. The
//! guard opens, places the stop, and when the stop cannot be placed it closes
//! the whole position at market, retrying the close once. Every escalation
//! goes to the [`AlertSink`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::Direction;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("order rejected: {0}")]
    Rejected(String),

    #[error("gateway unavailable: {0}")]
    Unavailable(String),

    #[error("request timed out")]
    Timeout,
}

/// A market entry with its protective stop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryRequest {
    pub symbol: String,
    pub direction: Direction,
    pub notional: f64,
    pub leverage: u32,
    pub reference_price: f64,
    pub stop_price: f64,
}

/// Venue-facing order operations. Implementations report failures as
/// [`GatewayError`]; they never panic across this boundary.
pub trait OrderGateway: Send {
    /// Market entry; returns the fill price.
    fn open_market(&mut self, request: &EntryRequest) -> Result<f64, GatewayError>;

    fn place_stop(&mut self, request: &EntryRequest) -> Result<(), GatewayError>;

    /// Market exit of `notional`; returns the fill price.
    fn close_market(
        &mut self,
        symbol: &str,
        direction: Direction,
        notional: f64,
        reference_price: f64,
    ) -> Result<f64, GatewayError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AlertLevel {
    Warning,
    Critical,
}

/// Human-visible escalation channel.
pub trait AlertSink: Send {
    fn alert(&mut self, level: AlertLevel, message: &str);
}

/// Alerts as log lines.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAlerts;

impl AlertSink for LogAlerts {
    fn alert(&mut self, level: AlertLevel, message: &str) {
        match level {
            AlertLevel::Warning => tracing::warn!(alert = true, "{message}"),
            AlertLevel::Critical => tracing::error!(alert = true, "{message}"),
        }
    }
}

/// Keeps every alert in memory.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlertLog {
    pub alerts: Vec<(AlertLevel, String)>,
}

impl AlertSink for AlertLog {
    fn alert(&mut self, level: AlertLevel, message: &str) {
        self.alerts.push((level, message.to_string()));
    }
}

/// What became of a guarded entry.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtectedEntry {
    /// Filled and the stop is resting.
    Protected { fill_price: f64 },
    /// The stop failed and the position was flattened.
    EmergencyClosed { fill_price: f64, exit_price: f64 },
    /// The stop failed and so did both close attempts. Escalated.
    Unprotected { fill_price: f64 },
    /// The entry itself failed; nothing is held.
    NotOpened(GatewayError),
}

/// Entry routing as seen by the engine.
pub trait LiveExecution: Send {
    fn open_protected(&mut self, request: &EntryRequest) -> ProtectedEntry;
}

const CLOSE_ATTEMPTS: usize = 2;

#[derive(Debug)]
pub struct ProtectiveStopGuard<G, A> {
    gateway: G,
    alerts: A,
}

impl<G: OrderGateway, A: AlertSink> ProtectiveStopGuard<G, A> {
    pub fn new(gateway: G, alerts: A) -> Self {
        Self { gateway, alerts }
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn alerts(&self) -> &A {
        &self.alerts
    }

    pub fn open_protected(&mut self, request: &EntryRequest) -> ProtectedEntry {
        let fill_price = match self.gateway.open_market(request) {
            Ok(price) => price,
            Err(e) => {
                tracing::warn!(symbol = %request.symbol, error = %e, "entry order failed");
                return ProtectedEntry::NotOpened(e);
            }
        };

        let stop_error = match self.gateway.place_stop(request) {
            Ok(()) => {
                tracing::info!(
                    symbol = %request.symbol,
                    direction = %request.direction,
                    fill_price,
                    stop = request.stop_price,
                    "entry filled, stop placed"
                );
                return ProtectedEntry::Protected { fill_price };
            }
            Err(e) => e,
        };

        tracing::error!(symbol = %request.symbol, error = %stop_error, "protective stop failed, closing position");
        self.alerts.alert(
            AlertLevel::Critical,
            &format!(
                "{} {} filled at {fill_price} without a stop ({stop_error}); emergency close",
                request.symbol, request.direction
            ),
        );

        for attempt in 1..=CLOSE_ATTEMPTS {
            match self
                .gateway
                .close_market(&request.symbol, request.direction, request.notional, fill_price)
            {
                Ok(exit_price) => {
                    tracing::warn!(symbol = %request.symbol, attempt, exit_price, "emergency close filled");
                    return ProtectedEntry::EmergencyClosed { fill_price, exit_price };
                }
                Err(e) => {
                    tracing::error!(symbol = %request.symbol, attempt, error = %e, "emergency close failed");
                }
            }
        }

        self.alerts.alert(
            AlertLevel::Critical,
            &format!(
                "{} {} notional {:.2} is OPEN WITHOUT A STOP after {CLOSE_ATTEMPTS} close attempts",
                request.symbol, request.direction, request.notional
            ),
        );
        ProtectedEntry::Unprotected { fill_price }
    }
}

impl<G: OrderGateway, A: AlertSink> LiveExecution for ProtectiveStopGuard<G, A> {
    fn open_protected(&mut self, request: &EntryRequest) -> ProtectedEntry {
        ProtectiveStopGuard::open_protected(self, request)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GatewayCall {
    Open { symbol: String, notional: f64 },
    Stop { symbol: String, price: f64 },
    Close { symbol: String, notional: f64 },
}

/// Simulated venue: fills at the reference price. Each `fail_*` counter makes
/// that many upcoming calls of the kind fail.
#[derive(Debug, Clone, Default)]
pub struct PaperGateway {
    pub fail_opens: usize,
    pub fail_stops: usize,
    pub fail_closes: usize,
    pub calls: Vec<GatewayCall>,
}

impl PaperGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_stops(n: usize) -> Self {
        Self {
            fail_stops: n,
            ..Self::default()
        }
    }

    fn take_failure(counter: &mut usize) -> bool {
        if *counter > 0 {
            *counter -= 1;
            true
        } else {
            false
        }
    }
}

impl OrderGateway for PaperGateway {
    fn open_market(&mut self, request: &EntryRequest) -> Result<f64, GatewayError> {
        self.calls.push(GatewayCall::Open {
            symbol: request.symbol.clone(),
            notional: request.notional,
        });
        if Self::take_failure(&mut self.fail_opens) {
            return Err(GatewayError::Rejected("paper open failure".into()));
        }
        Ok(request.reference_price)
    }

    fn place_stop(&mut self, request: &EntryRequest) -> Result<(), GatewayError> {
        self.calls.push(GatewayCall::Stop {
            symbol: request.symbol.clone(),
            price: request.stop_price,
        });
        if Self::take_failure(&mut self.fail_stops) {
            return Err(GatewayError::Timeout);
        }
        Ok(())
    }

    fn close_market(
        &mut self,
        symbol: &str,
        _direction: Direction,
        notional: f64,
        reference_price: f64,
    ) -> Result<f64, GatewayError> {
        self.calls.push(GatewayCall::Close {
            symbol: symbol.to_string(),
            notional,
        });
        if Self::take_failure(&mut self.fail_closes) {
            return Err(GatewayError::Unavailable("paper close failure".into()));
        }
        Ok(reference_price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> EntryRequest {
        EntryRequest {
            symbol: "ARBUSDT".into(),
            direction: Direction::Long,
            notional: 2_000.0,
            leverage: 3,
            reference_price: 1.25,
            stop_price: 1.2,
        }
    }

    fn closes(gw: &PaperGateway) -> usize {
        gw.calls
            .iter()
            .filter(|c| matches!(c, GatewayCall::Close { .. }))
            .count()
    }

    #[test]
    fn stop_placed_means_protected() {
        let mut guard = ProtectiveStopGuard::new(PaperGateway::new(), AlertLog::default());
        assert_eq!(
            guard.open_protected(&request()),
            ProtectedEntry::Protected { fill_price: 1.25 }
        );
        assert!(guard.alerts().alerts.is_empty());
        assert_eq!(closes(guard.gateway()), 0);
    }

    #[test]
    fn failed_stop_triggers_emergency_close() {
        let mut guard = ProtectiveStopGuard::new(PaperGateway::failing_stops(1), AlertLog::default());
        let outcome = guard.open_protected(&request());
        assert_eq!(
            outcome,
            ProtectedEntry::EmergencyClosed {
                fill_price: 1.25,
                exit_price: 1.25
            }
        );
        assert_eq!(closes(guard.gateway()), 1);
        assert_eq!(guard.alerts().alerts.len(), 1);
        assert_eq!(guard.alerts().alerts[0].0, AlertLevel::Critical);
    }

    #[test]
    fn close_is_retried_exactly_once() {
        let gateway = PaperGateway {
            fail_stops: 1,
            fail_closes: 1,
            ..PaperGateway::default()
        };
        let mut guard = ProtectiveStopGuard::new(gateway, AlertLog::default());
        assert!(matches!(
            guard.open_protected(&request()),
            ProtectedEntry::EmergencyClosed { .. }
        ));
        assert_eq!(closes(guard.gateway()), 2);

        let gateway = PaperGateway {
            fail_stops: 1,
            fail_closes: 5,
            ..PaperGateway::default()
        };
        let mut guard = ProtectiveStopGuard::new(gateway, AlertLog::default());
        assert_eq!(
            guard.open_protected(&request()),
            ProtectedEntry::Unprotected { fill_price: 1.25 }
        );
        assert_eq!(closes(guard.gateway()), 2);
        assert_eq!(guard.alerts().alerts.len(), 2);
    }

    #[test]
    fn failed_entry_holds_nothing() {
        let gateway = PaperGateway {
            fail_opens: 1,
            ..PaperGateway::default()
        };
        let mut guard = ProtectiveStopGuard::new(gateway, AlertLog::default());
        assert!(matches!(
            guard.open_protected(&request()),
            ProtectedEntry::NotOpened(GatewayError::Rejected(_))
        ));
        assert_eq!(guard.gateway().calls.len(), 1);
    }
}
