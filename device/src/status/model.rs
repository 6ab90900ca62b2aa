use fixlink::FixRecord;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

type Cell = Arc<RwLock<Option<FixRecord>>>;

/// Body of `GET /position`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionReply {
    pub position: Option<FixRecord>,
}

/// Creates the latest-fix cell. The publisher is the only writer and is not
/// `Clone`; readers can be cloned freely.
pub fn latest_fix() -> (FixPublisher, LatestFix) {
    let cell = Cell::default();
    (FixPublisher { cell: cell.clone() }, LatestFix { cell })
}

/// Write side, owned by the driver loop.
pub struct FixPublisher {
    cell: Cell,
}

impl FixPublisher {
    pub fn publish(&self, record: FixRecord) {
        *write(&self.cell) = Some(record);
    }
}

/// Read side, handed to the status view.
#[derive(Clone)]
pub struct LatestFix {
    cell: Cell,
}

impl LatestFix {
    pub fn current(&self) -> Option<FixRecord> {
        read(&self.cell).clone()
    }

    pub fn reply(&self) -> PositionReply {
        PositionReply {
            position: self.current(),
        }
    }
}

fn read(cell: &Cell) -> RwLockReadGuard<'_, Option<FixRecord>> {
    match cell.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write(cell: &Cell) -> RwLockWriteGuard<'_, Option<FixRecord>> {
    match cell.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readers_see_the_latest_publish() {
        let (publisher, latest) = latest_fix();
        let reader = latest.clone();
        assert_eq!(reader.current(), None);

        publisher.publish(FixRecord::new(1.0, 2.0, None, None, 10.0));
        publisher.publish(FixRecord::new(3.0, 4.0, None, None, 20.0));
        assert_eq!(reader.current().map(|r| r.timestamp), Some(20.0));
        assert_eq!(latest.reply().position, reader.current());
    }
}
