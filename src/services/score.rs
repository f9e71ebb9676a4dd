use time::{OffsetDateTime, UtcOffset};

use crate::{config::ScoreConfig, dao::models::TagStats};

/// Chain context a subtag is scored against.
#[derive(Debug, Clone, Copy)]
pub struct SubtagContext {
    /// Instant the subtag was posted.
    pub posted_at: OffsetDateTime,
    /// Instant the owning root tag was posted.
    pub root_posted_at: OffsetDateTime,
    /// Whether the root chain already carried at least one reply when this
    /// subtag was scored.
    pub chain_had_replies: bool,
}

/// Score a root tag. Opening a new chain always earns the fixed award and
/// counts as on time.
pub fn score_root_tag(config: &ScoreConfig) -> TagStats {
    TagStats {
        points: config.new_chain_points,
        new_tag: true,
        posted_on_time: true,
        won_tag: false,
    }
}

/// Score a subtag against its root chain context.
///
/// Timing compares calendar days only, normalized into the chain offset: a
/// reply posted any time within the root's posting day earns the on-time
/// bonus, anything later earns the base award. The win flag lands on a reply
/// that displaces an existing one as the chain tail; it is never revisited
/// when that reply is displaced in turn.
pub fn score_subtag(config: &ScoreConfig, context: SubtagContext, offset: UtcOffset) -> TagStats {
    let posted_on_time = same_posting_day(context.posted_at, context.root_posted_at, offset);
    let points = if posted_on_time {
        config.on_time_points
    } else {
        config.late_points
    };

    TagStats {
        points,
        new_tag: false,
        posted_on_time,
        won_tag: context.chain_had_replies,
    }
}

fn same_posting_day(a: OffsetDateTime, b: OffsetDateTime, offset: UtcOffset) -> bool {
    a.to_offset(offset).date() == b.to_offset(offset).date()
}
