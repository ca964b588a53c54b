//! Event correlation and suspension records
//!
//! A suspended instance is represented by exactly one persisted
//! [`WaitRecord`]: a timer deadline, a retry wake-up, or a set of event
//! subscriptions with their fan-in policy. Incoming events are offered to
//! every pending record; a satisfied record yields the value the suspended
//! task resumes with. Matching holds no thread, connection or lock; the
//! record is pure data.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{ErrorKind, WorkflowError};
use crate::eventbus::Event;
use crate::expressions::{self, Vars};
use crate::model::FlowDirective;
use crate::position::Position;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WaitRecord {
    pub id: Uuid,
    pub instance_id: Uuid,
    /// Task the instance suspended at (for retries, the resume target
    /// inside the protected block instead).
    pub position: Position,
    pub kind: WaitKind,
    /// Timer deadline, or the listen timeout when subscriptions are set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wake_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum WaitKind {
    /// `wait` task: on wake, complete the task at `position` with its input.
    Timer,
    /// Retry backoff: on wake, resume execution at `position` with the
    /// protected block's entry data.
    RetryDelay,
    /// `listen` task: resume once the subscriptions are satisfied.
    Listen(ListenWait),
}

impl WaitRecord {
    #[must_use]
    pub fn timer(instance_id: Uuid, position: Position, wake_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            instance_id,
            position,
            kind: WaitKind::Timer,
            wake_at: Some(wake_at),
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn retry_delay(instance_id: Uuid, position: Position, wake_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            instance_id,
            position,
            kind: WaitKind::RetryDelay,
            wake_at: Some(wake_at),
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn listen(
        instance_id: Uuid,
        position: Position,
        listen: ListenWait,
        deadline: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            instance_id,
            position,
            kind: WaitKind::Listen(listen),
            wake_at: deadline,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.wake_at.is_some_and(|at| at <= now)
    }
}

/// Consumption mode over the subscriptions of one `listen` task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ListenMode {
    One,
    All,
    Any,
}

/// One named subscription: equality attributes (already resolved to
/// literals at suspension time) plus an optional `when` predicate evaluated
/// with the event as input.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Subscription {
    pub name: String,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub with: IndexMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
}

impl Subscription {
    fn matches(&self, event: &Event) -> std::result::Result<bool, WorkflowError> {
        for (key, expected) in &self.with {
            if event.attribute(key) != Some(expected) {
                return Ok(false);
            }
        }
        if let Some(when) = &self.when {
            let result = expressions::evaluate_raw(when, &event.attributes, &Vars::new())
                .map_err(|e| WorkflowError::new(ErrorKind::Expression, e.to_string()))?;
            return Ok(expressions::truthy(&result));
        }
        Ok(true)
    }
}

/// The unresolved predicates and accumulated matches of a `listen` wait.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListenWait {
    pub mode: ListenMode,
    pub subscriptions: Vec<Subscription>,
    /// Fan-in: number of matches to accumulate before resuming (`one`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<u64>,
    /// Fan-in: resume once this predicate over `{events: [...]}` is true.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<String>,
    /// Fan-in: keep consuming while this predicate stays true.
    #[serde(rename = "while", skip_serializing_if = "Option::is_none")]
    pub while_: Option<String>,
    /// Fallback continuation when the timeout fires before a match.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_then: Option<FlowDirective>,
    /// Matched events per subscription name, in arrival order.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub matched: IndexMap<String, Vec<Value>>,
}

/// Outcome of offering one event to a pending listen wait.
#[derive(Debug, Clone, PartialEq)]
pub enum Offer {
    /// No subscription matched.
    Ignored,
    /// Matched but the fan-in policy is not yet satisfied; the updated
    /// record must be re-persisted.
    Accumulated,
    /// The wait is satisfied; resume the task with this value.
    Satisfied(Value),
}

impl ListenWait {
    /// Offer an incoming event. `one` resumes on first match (or per its
    /// amount/until/while policy), `all` accumulates until every
    /// subscription matched at least once, `any` resumes on the first match
    /// of any alternative and records which one fired.
    pub fn offer(&mut self, event: &Event) -> std::result::Result<Offer, WorkflowError> {
        let matched_name = {
            let mut found = None;
            for sub in &self.subscriptions {
                if sub.matches(event)? {
                    found = Some(sub.name.clone());
                    break;
                }
            }
            match found {
                Some(name) => name,
                None => return Ok(Offer::Ignored),
            }
        };

        self.matched
            .entry(matched_name.clone())
            .or_default()
            .push(event.attributes.clone());

        match self.mode {
            ListenMode::Any => Ok(Offer::Satisfied(
                serde_json::json!({ matched_name: event.attributes.clone() }),
            )),
            ListenMode::All => {
                let all_matched = self
                    .subscriptions
                    .iter()
                    .all(|sub| self.matched.contains_key(&sub.name));
                if all_matched {
                    Ok(Offer::Satisfied(self.all_output()))
                } else {
                    Ok(Offer::Accumulated)
                }
            }
            ListenMode::One => self.check_fan_in(),
        }
    }

    /// Every matched event so far, in arrival order.
    #[must_use]
    pub fn collected(&self) -> Vec<Value> {
        self.matched.values().flatten().cloned().collect()
    }

    fn all_output(&self) -> Value {
        let mut out = serde_json::Map::new();
        for sub in &self.subscriptions {
            if let Some(events) = self.matched.get(&sub.name) {
                if let Some(first) = events.first() {
                    out.insert(sub.name.clone(), first.clone());
                }
            }
        }
        Value::Object(out)
    }

    fn check_fan_in(&self) -> std::result::Result<Offer, WorkflowError> {
        let events = self.collected();

        if let Some(amount) = self.amount {
            return if events.len() as u64 >= amount {
                Ok(Offer::Satisfied(Value::Array(events)))
            } else {
                Ok(Offer::Accumulated)
            };
        }

        let envelope = serde_json::json!({ "events": events });
        if let Some(until) = &self.until {
            let result = expressions::evaluate_raw(until, &envelope, &Vars::new())
                .map_err(|e| WorkflowError::new(ErrorKind::Expression, e.to_string()))?;
            return if expressions::truthy(&result) {
                Ok(Offer::Satisfied(Value::Array(events)))
            } else {
                Ok(Offer::Accumulated)
            };
        }
        if let Some(while_) = &self.while_ {
            let result = expressions::evaluate_raw(while_, &envelope, &Vars::new())
                .map_err(|e| WorkflowError::new(ErrorKind::Expression, e.to_string()))?;
            return if expressions::truthy(&result) {
                Ok(Offer::Accumulated)
            } else {
                Ok(Offer::Satisfied(Value::Array(events)))
            };
        }

        // Plain `one`: first match resumes with the single event.
        let single = events.into_iter().next().unwrap_or(Value::Null);
        Ok(Offer::Satisfied(single))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sub(name: &str, event_type: &str) -> Subscription {
        Subscription {
            name: name.to_string(),
            with: IndexMap::from([("type".to_string(), json!(event_type))]),
            when: None,
        }
    }

    fn event(event_type: &str, data: Value) -> Event {
        Event::new(json!({"type": event_type, "data": data}))
    }

    #[test]
    fn test_one_resumes_on_first_match() {
        let mut wait = ListenWait {
            mode: ListenMode::One,
            subscriptions: vec![sub("order", "order.placed")],
            amount: None,
            until: None,
            while_: None,
            timeout_then: None,
            matched: IndexMap::new(),
        };
        assert_eq!(wait.offer(&event("other.kind", json!({}))).unwrap(), Offer::Ignored);
        match wait.offer(&event("order.placed", json!({"id": "o-1"}))).unwrap() {
            Offer::Satisfied(value) => assert_eq!(value["data"]["id"], "o-1"),
            other => panic!("expected satisfied, got {other:?}"),
        }
    }

    #[test]
    fn test_all_is_arrival_order_independent() {
        let base = ListenWait {
            mode: ListenMode::All,
            subscriptions: vec![sub("order", "order.placed"), sub("payment", "payment.received")],
            amount: None,
            until: None,
            while_: None,
            timeout_then: None,
            matched: IndexMap::new(),
        };
        let order = event("order.placed", json!({}));
        let payment = event("payment.received", json!({}));

        for events in [[&order, &payment], [&payment, &order]] {
            let mut wait = base.clone();
            assert_eq!(wait.offer(events[0]).unwrap(), Offer::Accumulated);
            match wait.offer(events[1]).unwrap() {
                Offer::Satisfied(value) => {
                    assert!(value.get("order").is_some());
                    assert!(value.get("payment").is_some());
                }
                other => panic!("expected satisfied, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_any_records_which_subscription_fired() {
        let mut wait = ListenWait {
            mode: ListenMode::Any,
            subscriptions: vec![sub("approved", "review.approved"), sub("rejected", "review.rejected")],
            amount: None,
            until: None,
            while_: None,
            timeout_then: None,
            matched: IndexMap::new(),
        };
        match wait.offer(&event("review.rejected", json!({}))).unwrap() {
            Offer::Satisfied(value) => assert!(value.get("rejected").is_some()),
            other => panic!("expected satisfied, got {other:?}"),
        }
    }

    #[test]
    fn test_amount_fan_in_accumulates() {
        let mut wait = ListenWait {
            mode: ListenMode::One,
            subscriptions: vec![sub("reading", "sensor.reading")],
            amount: Some(3),
            until: None,
            while_: None,
            timeout_then: None,
            matched: IndexMap::new(),
        };
        assert_eq!(wait.offer(&event("sensor.reading", json!(1))).unwrap(), Offer::Accumulated);
        assert_eq!(wait.offer(&event("sensor.reading", json!(2))).unwrap(), Offer::Accumulated);
        match wait.offer(&event("sensor.reading", json!(3))).unwrap() {
            Offer::Satisfied(Value::Array(events)) => assert_eq!(events.len(), 3),
            other => panic!("expected three events, got {other:?}"),
        }
    }

    #[test]
    fn test_until_predicate_over_collected_events() {
        let mut wait = ListenWait {
            mode: ListenMode::One,
            subscriptions: vec![sub("reading", "sensor.reading")],
            amount: None,
            until: Some("(.events | length) >= 2".to_string()),
            while_: None,
            timeout_then: None,
            matched: IndexMap::new(),
        };
        assert_eq!(wait.offer(&event("sensor.reading", json!(1))).unwrap(), Offer::Accumulated);
        assert!(matches!(
            wait.offer(&event("sensor.reading", json!(2))).unwrap(),
            Offer::Satisfied(_)
        ));
    }

    #[test]
    fn test_when_predicate_filters_events() {
        let mut wait = ListenWait {
            mode: ListenMode::One,
            subscriptions: vec![Subscription {
                name: "big".to_string(),
                with: IndexMap::from([("type".to_string(), json!("payment.received"))]),
                when: Some(".data.amount > 100".to_string()),
            }],
            amount: None,
            until: None,
            while_: None,
            timeout_then: None,
            matched: IndexMap::new(),
        };
        assert_eq!(
            wait.offer(&event("payment.received", json!({"amount": 10}))).unwrap(),
            Offer::Ignored
        );
        assert!(matches!(
            wait.offer(&event("payment.received", json!({"amount": 500}))).unwrap(),
            Offer::Satisfied(_)
        ));
    }

    #[test]
    fn test_timer_due() {
        let wait = WaitRecord::timer(Uuid::new_v4(), Position::root(), Utc::now());
        assert!(wait.is_due(Utc::now()));
        let future = WaitRecord::timer(
            Uuid::new_v4(),
            Position::root(),
            Utc::now() + chrono::Duration::seconds(60),
        );
        assert!(!future.is_due(Utc::now()));
    }
}
