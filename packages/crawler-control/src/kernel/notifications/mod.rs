//! Push notifications: LISTEN channel, payloads, and the per-run fan-out buffer.

mod channel;
mod distributor;
mod listener;
mod notification;
pub mod testing;

pub use channel::{ChannelError, ChannelExit, NotificationChannel};
pub use distributor::{DistributorStats, NotificationDistributor, RunSubscription};
pub use listener::{ListenerConnection, ListenerConnector, PgListenerConnector};
pub use notification::{Notification, NotificationSink};
pub use testing::TestListener;
