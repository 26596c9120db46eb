//! Publication
//!
//! Producer handle over one mapped log. Any number of threads may offer
//! through a shared `Publication`; claims are granted lock-free by the term
//! appender and bounded by the publication limit.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;

use super::claim::BufferClaim;
use super::conductor::PublicationConductor;
use super::limit::PublicationLimit;
use crate::error::{Error, OfferError, Result};
use crate::logbuffer::frame::aligned_frame_length;
use crate::logbuffer::layout::{
    compute_term_begin_position, index_by_term_count, term_id, term_offset_from_tail,
};
use crate::logbuffer::{
    rotate_log, tails_consistent, AppendOutcome, HeaderWriter, LogBuffers, LogLayout, MappedRegion,
    RotateOutcome, TermAppender,
};

/// Frame placed by one pass of the claim loop
struct Placement {
    partition: usize,
    frame_offset: usize,
    position: i64,
}

/// Producer handle for one stream
pub struct Publication {
    conductor: Arc<dyn PublicationConductor>,
    channel: String,
    session_id: i32,
    stream_id: i32,
    registration_id: i64,
    initial_term_id: i32,
    layout: LogLayout,
    max_message_length: usize,
    max_possible_position: i64,
    publication_limit: Arc<PublicationLimit>,
    log_buffers: Arc<LogBuffers>,
    header_writer: HeaderWriter,
    ref_count: AtomicI32,
    is_closed: AtomicBool,
}

impl Publication {
    /// Attach to an initialised log. Session and stream ids and the initial
    /// term id are read from the log's metadata.
    ///
    /// Fails with [`Error::LogBufferUninitialised`] unless the tails were
    /// stamped first, e.g. by `RawLog::initialise`.
    pub fn new(
        conductor: Arc<dyn PublicationConductor>,
        channel: impl Into<String>,
        registration_id: i64,
        publication_limit: Arc<PublicationLimit>,
        log_buffers: Arc<LogBuffers>,
    ) -> Result<Self> {
        let channel = channel.into();
        let (session_id, stream_id, initial_term_id) = {
            let region = log_buffers
                .acquire()
                .ok_or_else(|| Error::LogBufferClosed(channel.clone()))?;
            if !tails_consistent(&region) {
                return Err(Error::LogBufferUninitialised(channel));
            }
            let log_meta = region.log_meta_data();
            (log_meta.session_id(), log_meta.stream_id(), log_meta.initial_term_id())
        };
        let layout = log_buffers.layout();

        Ok(Self {
            conductor,
            channel,
            session_id,
            stream_id,
            registration_id,
            initial_term_id,
            layout,
            max_message_length: layout.max_message_length(),
            max_possible_position: layout.max_possible_position(),
            publication_limit,
            log_buffers,
            header_writer: HeaderWriter::new(session_id, stream_id),
            ref_count: AtomicI32::new(1),
            is_closed: AtomicBool::new(false),
        })
    }

    /// Copy `buffer` into the log as one frame and commit it.
    ///
    /// Returns the stream position after the frame.
    pub fn offer(&self, buffer: &[u8]) -> std::result::Result<i64, OfferError> {
        let region = self.acquire()?;
        self.check_message_length(buffer.len())?;

        let placement = self.place(&region, buffer.len(), |appender| {
            appender.append_unfragmented(&self.header_writer, buffer)
        })?;
        Ok(placement.position)
    }

    /// Reserve a frame of `length` payload bytes to be written in place.
    ///
    /// The returned claim must be committed or aborted; dropping it aborts.
    pub fn try_claim(&self, length: usize) -> std::result::Result<BufferClaim<'_>, OfferError> {
        let region = self.acquire()?;
        self.check_message_length(length)?;

        let placement = self.place(&region, length, |appender| {
            appender.claim(&self.header_writer, length)
        })?;
        Ok(BufferClaim::new(
            region,
            placement.partition,
            placement.frame_offset,
            length,
            placement.position,
        ))
    }

    /// Claim loop shared by `offer` and `try_claim`
    fn place<F>(
        &self,
        region: &MappedRegion<'_>,
        length: usize,
        append: F,
    ) -> std::result::Result<Placement, OfferError>
    where
        F: Fn(&TermAppender<'_>) -> (i32, AppendOutcome),
    {
        let shift = self.layout.position_bits_to_shift();
        let term_length = self.layout.term_length();
        let log_meta = region.log_meta_data();

        loop {
            let term_count = log_meta.active_term_count();
            let partition = index_by_term_count(term_count);
            let appender = TermAppender::new(region, partition);

            let raw_tail = appender.raw_tail_volatile();
            let tail_term_id = term_id(raw_tail);
            if term_count != tail_term_id.wrapping_sub(self.initial_term_id) {
                return Err(OfferError::AdminAction);
            }

            let tail_term_begin = compute_term_begin_position(tail_term_id, shift, self.initial_term_id);
            let tail_offset = term_offset_from_tail(raw_tail, term_length);
            if tail_offset >= term_length {
                // Term already filled: rotate without claiming so the tail stops growing
                self.rotate(region, tail_term_begin, tail_term_id)?;
                continue;
            }

            let position = tail_term_begin + tail_offset as i64;
            if position + aligned_frame_length(length) as i64 > self.publication_limit.get_volatile() {
                return Err(self.back_pressure_status(region));
            }

            let (claimed_term_id, outcome) = append(&appender);
            let term_begin = compute_term_begin_position(claimed_term_id, shift, self.initial_term_id);
            match outcome {
                AppendOutcome::Appended {
                    term_offset,
                    resulting_offset,
                } => {
                    return Ok(Placement {
                        partition,
                        frame_offset: term_offset,
                        position: term_begin + resulting_offset as i64,
                    });
                }
                AppendOutcome::Tripped | AppendOutcome::Failed => {
                    self.rotate(region, term_begin, claimed_term_id)?;
                }
            }
        }
    }

    /// Move the log past a filled term, or report why it cannot move yet
    fn rotate(
        &self,
        region: &MappedRegion<'_>,
        term_begin: i64,
        term_id: i32,
    ) -> std::result::Result<(), OfferError> {
        if term_begin + self.layout.term_length() as i64 >= self.max_possible_position {
            return Err(OfferError::MaxPositionExceeded);
        }
        let term_count = term_id.wrapping_sub(self.initial_term_id);
        match rotate_log(region, term_count, term_id) {
            RotateOutcome::Rotated | RotateOutcome::AlreadyRotated => Ok(()),
            RotateOutcome::Unavailable => Err(OfferError::AdminAction),
        }
    }

    fn back_pressure_status(&self, region: &MappedRegion<'_>) -> OfferError {
        let time_of_last_status_message = region.log_meta_data().time_of_last_status_message();
        if self.conductor.is_publication_connected(time_of_last_status_message) {
            OfferError::BackPressured
        } else {
            OfferError::NotConnected
        }
    }

    fn check_message_length(&self, length: usize) -> std::result::Result<(), OfferError> {
        if length > self.max_message_length {
            return Err(OfferError::MessageTooLarge {
                length,
                max: self.max_message_length,
            });
        }
        Ok(())
    }

    fn acquire(&self) -> std::result::Result<MappedRegion<'_>, OfferError> {
        if self.is_closed.load(Ordering::Acquire) {
            return Err(OfferError::Closed);
        }
        self.log_buffers.acquire().ok_or(OfferError::Closed)
    }

    /// Current stream position of the active term's tail
    pub fn position(&self) -> std::result::Result<i64, OfferError> {
        let region = self.acquire()?;
        Ok(self.tail_position(&region))
    }

    fn tail_position(&self, region: &MappedRegion<'_>) -> i64 {
        let term_count = region.log_meta_data().active_term_count();
        let raw_tail = region
            .term_meta_data(index_by_term_count(term_count))
            .raw_tail_volatile();
        compute_term_begin_position(
            term_id(raw_tail),
            self.layout.position_bits_to_shift(),
            self.initial_term_id,
        ) + term_offset_from_tail(raw_tail, self.layout.term_length()) as i64
    }

    /// Position the publication may not claim past
    pub fn position_limit(&self) -> std::result::Result<i64, OfferError> {
        if self.is_closed() {
            return Err(OfferError::Closed);
        }
        Ok(self.publication_limit.get_volatile())
    }

    /// Whether a subscriber is live and has advertised room to publish into
    pub fn is_connected(&self) -> bool {
        let Ok(region) = self.acquire() else {
            return false;
        };
        let time_of_last_status_message = region.log_meta_data().time_of_last_status_message();
        self.conductor.is_publication_connected(time_of_last_status_message)
            && self.publication_limit.get_volatile() > 0
    }

    /// Add a reference for another holder of this publication.
    ///
    /// Fails with `Closed` once the count has reached zero; a closed
    /// publication is never reopened.
    pub fn inc_ref(&self) -> std::result::Result<i32, OfferError> {
        self.ref_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                (count > 0).then(|| count + 1)
            })
            .map(|prev| prev + 1)
            .map_err(|_| OfferError::Closed)
    }

    /// Drop one reference. The last one closes the publication, notifies the
    /// conductor and unmaps the log once in-flight claims finish. Further
    /// calls do nothing.
    pub fn close(&self) {
        let released = self
            .ref_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                (count > 0).then(|| count - 1)
            });
        if released != Ok(1) {
            return;
        }

        self.is_closed.store(true, Ordering::Release);
        if let Some(region) = self.log_buffers.acquire() {
            let position = self.tail_position(&region);
            region.log_meta_data().set_end_of_stream_position(position);
        }
        self.conductor.release_publication(self);
        self.log_buffers.close();
    }

    pub fn is_closed(&self) -> bool {
        self.is_closed.load(Ordering::Acquire)
    }

    pub fn ref_count(&self) -> i32 {
        self.ref_count.load(Ordering::Acquire)
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn session_id(&self) -> i32 {
        self.session_id
    }

    pub fn stream_id(&self) -> i32 {
        self.stream_id
    }

    pub fn registration_id(&self) -> i64 {
        self.registration_id
    }

    pub fn initial_term_id(&self) -> i32 {
        self.initial_term_id
    }

    pub fn term_buffer_length(&self) -> usize {
        self.layout.term_length()
    }

    pub fn max_message_length(&self) -> usize {
        self.max_message_length
    }

    pub fn max_possible_position(&self) -> i64 {
        self.max_possible_position
    }

    pub fn log_buffers(&self) -> &Arc<LogBuffers> {
        &self.log_buffers
    }
}

impl std::fmt::Debug for Publication {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publication")
            .field("channel", &self.channel)
            .field("session_id", &self.session_id)
            .field("stream_id", &self.stream_id)
            .field("registration_id", &self.registration_id)
            .field("ref_count", &self.ref_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logbuffer::frame::{
        frame_length_volatile, frame_type, is_padding_frame, reserved_value, HDR_TYPE_DATA,
        HEADER_LENGTH,
    };
    use crate::logbuffer::layout::pack_tail;
    use crate::logbuffer::{clean_term, initialise_tails, TermStatus, TERM_MIN_LENGTH};
    use crate::publication::LocalConductor;
    use rand::Rng;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    const INITIAL_TERM_ID: i32 = 7;
    const SESSION_ID: i32 = 13;
    const STREAM_ID: i32 = 2;
    const REGISTRATION_ID: i64 = 2000;

    /// Conductor that counts releases and reports a fixed connection state
    #[derive(Default)]
    struct CountingConductor {
        connected: AtomicBool,
        releases: AtomicUsize,
    }

    impl PublicationConductor for CountingConductor {
        fn is_publication_connected(&self, _time_of_last_status_message_ms: i64) -> bool {
            self.connected.load(Ordering::Acquire)
        }

        fn release_publication(&self, _publication: &Publication) {
            self.releases.fetch_add(1, Ordering::AcqRel);
        }
    }

    struct Fixture {
        conductor: Arc<CountingConductor>,
        limit: Arc<PublicationLimit>,
        publication: Publication,
    }

    fn fixture(term_length: usize, limit: i64) -> Fixture {
        let buffers = LogBuffers::map_anon(LogLayout::new(term_length).unwrap()).unwrap();
        {
            let region = buffers.acquire().unwrap();
            region
                .log_meta_data()
                .set_stream_identity(SESSION_ID, STREAM_ID, REGISTRATION_ID);
            initialise_tails(&region, INITIAL_TERM_ID);
        }

        let conductor = Arc::new(CountingConductor::default());
        conductor.connected.store(true, Ordering::Release);
        let limit = Arc::new(PublicationLimit::new(limit));
        let publication = Publication::new(
            conductor.clone(),
            "udp://localhost:40124",
            REGISTRATION_ID,
            limit.clone(),
            Arc::new(buffers),
        )
        .unwrap();

        Fixture {
            conductor,
            limit,
            publication,
        }
    }

    fn raw_tail(publication: &Publication, partition: usize) -> i64 {
        let region = publication.log_buffers().acquire().unwrap();
        region.term_meta_data(partition).raw_tail_volatile()
    }

    #[test]
    fn test_reads_identity_from_log() {
        let f = fixture(TERM_MIN_LENGTH, 0);
        assert_eq!(f.publication.session_id(), SESSION_ID);
        assert_eq!(f.publication.stream_id(), STREAM_ID);
        assert_eq!(f.publication.initial_term_id(), INITIAL_TERM_ID);
        assert_eq!(f.publication.max_message_length(), TERM_MIN_LENGTH / 8);
        assert_eq!(f.publication.position(), Ok(0));
        assert_eq!(f.publication.ref_count(), 1);
    }

    #[test]
    fn test_closed_publication_reports_closed() {
        let f = fixture(TERM_MIN_LENGTH, 1024 * 1024);
        f.publication.close();

        assert!(f.publication.is_closed());
        assert_eq!(f.publication.position(), Err(OfferError::Closed));
        assert_eq!(f.publication.offer(b"data"), Err(OfferError::Closed));
        assert_eq!(f.publication.try_claim(4).unwrap_err(), OfferError::Closed);
        assert_eq!(f.publication.position_limit(), Err(OfferError::Closed));
        assert!(!f.publication.is_connected());
    }

    #[test]
    fn test_offer_on_closed_publication_does_not_touch_log() {
        let f = fixture(TERM_MIN_LENGTH, 1024 * 1024);
        f.publication.inc_ref().unwrap();
        let region_owner = f.publication.log_buffers().clone();
        let region = region_owner.acquire().unwrap();

        f.publication.close();
        f.publication.close();
        assert!(f.publication.is_closed());
        assert_eq!(f.publication.offer(b"data"), Err(OfferError::Closed));
        assert_eq!(region.term_meta_data(0).raw_tail_volatile(), pack_tail(INITIAL_TERM_ID, 0));
    }

    #[test]
    fn test_not_connected_when_no_status_message() {
        let f = fixture(TERM_MIN_LENGTH, 0);
        f.conductor.connected.store(false, Ordering::Release);
        assert!(!f.publication.is_connected());
        assert_eq!(f.publication.offer(b"data"), Err(OfferError::NotConnected));
    }

    #[test]
    fn test_connected_with_live_conductor_and_limit() {
        let f = fixture(TERM_MIN_LENGTH, 0);
        assert!(!f.publication.is_connected());
        f.limit.set_ordered(4096);
        assert!(f.publication.is_connected());
        f.conductor.connected.store(false, Ordering::Release);
        assert!(!f.publication.is_connected());
    }

    #[test]
    fn test_back_pressure_leaves_tail_unchanged() {
        let f = fixture(TERM_MIN_LENGTH, 64);
        assert_eq!(f.publication.offer(&[1u8; 8]), Ok(64));

        let before = raw_tail(&f.publication, 0);
        assert_eq!(f.publication.offer(&[2u8; 8]), Err(OfferError::BackPressured));
        assert_eq!(f.publication.try_claim(8).unwrap_err(), OfferError::BackPressured);
        assert_eq!(raw_tail(&f.publication, 0), before);
        assert_eq!(f.publication.position(), Ok(64));
    }

    #[test]
    fn test_oversize_message_is_rejected() {
        let f = fixture(TERM_MIN_LENGTH, i64::MAX);
        let max = f.publication.max_message_length();
        let err = f.publication.offer(&vec![0u8; max + 1]).unwrap_err();
        assert_eq!(err, OfferError::MessageTooLarge { length: max + 1, max });
        assert!(err.is_contract_violation());
        assert!(f.publication.offer(&vec![0u8; max]).is_ok());
    }

    #[test]
    fn test_release_only_after_last_reference() {
        let f = fixture(TERM_MIN_LENGTH, 0);
        assert_eq!(f.publication.inc_ref(), Ok(2));
        assert_eq!(f.publication.inc_ref(), Ok(3));

        f.publication.close();
        f.publication.close();
        assert!(!f.publication.is_closed());
        assert!(f.publication.log_buffers().is_mapped());
        assert_eq!(f.conductor.releases.load(Ordering::Acquire), 0);

        f.publication.close();
        assert!(f.publication.is_closed());
        assert!(!f.publication.log_buffers().is_mapped());
        assert_eq!(f.conductor.releases.load(Ordering::Acquire), 1);

        f.publication.close();
        f.publication.close();
        assert_eq!(f.conductor.releases.load(Ordering::Acquire), 1);
        assert_eq!(f.publication.inc_ref(), Err(OfferError::Closed));
        assert_eq!(f.publication.ref_count(), 0);
    }

    #[test]
    fn test_racing_closes_release_once() {
        for _ in 0..32 {
            let f = fixture(TERM_MIN_LENGTH, 0);
            for _ in 0..7 {
                f.publication.inc_ref().unwrap();
            }
            std::thread::scope(|s| {
                for _ in 0..16 {
                    s.spawn(|| f.publication.close());
                }
            });
            assert!(f.publication.is_closed());
            assert_eq!(f.conductor.releases.load(Ordering::Acquire), 1);
        }
    }

    #[test]
    fn test_close_records_end_of_stream_position() {
        let f = fixture(TERM_MIN_LENGTH, i64::MAX);
        f.publication.offer(b"last words").unwrap();
        let buffers = f.publication.log_buffers().clone();
        let region = buffers.acquire().unwrap();

        f.publication.close();
        assert_eq!(region.log_meta_data().end_of_stream_position(), 64);
    }

    #[test]
    fn test_close_notifies_local_conductor() {
        let buffers = LogBuffers::map_anon(LogLayout::new(TERM_MIN_LENGTH).unwrap()).unwrap();
        initialise_tails(&buffers.acquire().unwrap(), INITIAL_TERM_ID);
        let conductor = Arc::new(LocalConductor::new(Duration::from_secs(5)));
        let publication = Publication::new(
            conductor.clone(),
            "ipc",
            42,
            Arc::new(PublicationLimit::new(0)),
            Arc::new(buffers),
        )
        .unwrap();

        publication.close();
        assert_eq!(conductor.released(), vec![42]);
    }

    #[test]
    fn test_max_position_exceeded() {
        let f = fixture(TERM_MIN_LENGTH, i64::MAX);
        let term_count = i32::MAX;
        let partition = index_by_term_count(term_count);
        {
            let region = f.publication.log_buffers().acquire().unwrap();
            region.log_meta_data().set_active_term_count(term_count);
            region.term_meta_data(partition).set_raw_tail(pack_tail(
                INITIAL_TERM_ID.wrapping_add(term_count),
                TERM_MIN_LENGTH as i32,
            ));
        }

        assert_eq!(f.publication.offer(b"data"), Err(OfferError::MaxPositionExceeded));
        assert!(OfferError::MaxPositionExceeded.is_terminal());
    }

    #[test]
    fn test_rotation_pads_once_and_continues_at_offset_zero() {
        let f = fixture(TERM_MIN_LENGTH, i64::MAX);
        let payload = [7u8; 1000];
        let frame = aligned_frame_length(payload.len());

        let mut last = 0;
        while last + frame as i64 <= TERM_MIN_LENGTH as i64 {
            last = f.publication.offer(&payload).unwrap();
        }
        let remainder = TERM_MIN_LENGTH - last as usize;
        assert!(remainder > 0);

        let position = f.publication.offer(&payload).unwrap();
        assert_eq!(position, TERM_MIN_LENGTH as i64 + frame as i64);

        let buffers = f.publication.log_buffers().clone();
        let region = buffers.acquire().unwrap();
        assert_eq!(region.log_meta_data().active_term_count(), 1);
        assert_eq!(region.term_meta_data(0).status(), TermStatus::NeedsCleaning);

        let old_term = region.term_buffer(0);
        assert!(is_padding_frame(&old_term, last as usize));
        assert_eq!(frame_length_volatile(&old_term, last as usize), remainder as i32);

        let new_term = region.term_buffer(1);
        assert_eq!(frame_type(&new_term, 0), HDR_TYPE_DATA);
        assert_eq!(frame_length_volatile(&new_term, 0), (payload.len() + HEADER_LENGTH) as i32);
        assert_eq!(
            region.term_meta_data(1).raw_tail_volatile(),
            pack_tail(INITIAL_TERM_ID + 1, frame as i32)
        );
    }

    #[test]
    fn test_rotation_waits_for_cleaning() {
        let f = fixture(TERM_MIN_LENGTH, i64::MAX);
        let payload = [0u8; 4064];
        let frame = aligned_frame_length(payload.len()) as i64;
        let buffers = f.publication.log_buffers().clone();
        let region = buffers.acquire().unwrap();

        // Fill three terms; the fourth rotation needs partition 0 back.
        let mut admin_actions = 0;
        let mut position = 0;
        while position < 3 * TERM_MIN_LENGTH as i64 {
            match f.publication.offer(&payload) {
                Ok(p) => position = p,
                Err(OfferError::AdminAction) => {
                    admin_actions += 1;
                    break;
                }
                Err(e) => panic!("unexpected {e}"),
            }
        }
        assert_eq!(admin_actions, 0);
        assert_eq!(position, 3 * TERM_MIN_LENGTH as i64);
        assert_eq!(f.publication.offer(&payload), Err(OfferError::AdminAction));

        assert!(clean_term(&region, 0));
        assert_eq!(
            f.publication.offer(&payload),
            Ok(3 * TERM_MIN_LENGTH as i64 + frame)
        );
        assert_eq!(region.log_meta_data().active_term_count(), 3);
    }

    #[test]
    fn test_repeated_admin_action_does_not_wedge_log() {
        let f = fixture(TERM_MIN_LENGTH, i64::MAX);
        let payload = [0u8; 4064];
        let frame = aligned_frame_length(payload.len()) as i64;
        let buffers = f.publication.log_buffers().clone();
        let region = buffers.acquire().unwrap();

        let mut position = 0;
        while position < 3 * TERM_MIN_LENGTH as i64 {
            position = f.publication.offer(&payload).unwrap();
        }
        let full_tail = pack_tail(INITIAL_TERM_ID + 2, TERM_MIN_LENGTH as i32);
        assert_eq!(raw_tail(&f.publication, 2), full_tail);

        // Enough failed claims to carry a growing offset into the term id
        for _ in 0..100_000 {
            assert_eq!(f.publication.offer(&payload), Err(OfferError::AdminAction));
            assert_eq!(
                f.publication.try_claim(payload.len()).map(|claim| claim.position()),
                Err(OfferError::AdminAction)
            );
        }
        assert_eq!(raw_tail(&f.publication, 2), full_tail);
        assert_eq!(f.publication.position(), Ok(3 * TERM_MIN_LENGTH as i64));

        assert!(clean_term(&region, 0));
        assert_eq!(
            f.publication.offer(&payload),
            Ok(3 * TERM_MIN_LENGTH as i64 + frame)
        );
        assert_eq!(region.log_meta_data().active_term_count(), 3);
    }

    #[test]
    fn test_rejects_log_without_initialised_tails() {
        let buffers = LogBuffers::map_anon(LogLayout::new(TERM_MIN_LENGTH).unwrap()).unwrap();
        buffers
            .acquire()
            .unwrap()
            .log_meta_data()
            .set_stream_identity(SESSION_ID, STREAM_ID, REGISTRATION_ID);
        let buffers = Arc::new(buffers);
        let conductor = Arc::new(LocalConductor::new(Duration::from_secs(5)));

        let result = Publication::new(
            conductor.clone(),
            "ipc",
            REGISTRATION_ID,
            Arc::new(PublicationLimit::new(i64::MAX)),
            buffers.clone(),
        );
        assert!(matches!(result, Err(Error::LogBufferUninitialised(_))));

        initialise_tails(&buffers.acquire().unwrap(), INITIAL_TERM_ID);
        let publication = Publication::new(
            conductor,
            "ipc",
            REGISTRATION_ID,
            Arc::new(PublicationLimit::new(i64::MAX)),
            buffers,
        )
        .unwrap();
        assert_eq!(publication.initial_term_id(), INITIAL_TERM_ID);
    }

    #[test]
    fn test_end_to_end_positions_increase_with_one_rotation() {
        let term_length = 64 * 1024;
        let f = fixture(term_length, 1024 * 1024);
        let messages_per_term = term_length / 32;

        // An empty payload is exactly one 32-byte frame, so message i occupies
        // [i * 32, (i + 1) * 32) and offer reports the end of that range.
        let mut previous = 0;
        for i in 0..messages_per_term + 16 {
            let position = f.publication.offer(&[]).unwrap();
            assert_eq!(position - HEADER_LENGTH as i64, i as i64 * 32);
            assert_eq!(position, (i as i64 + 1) * 32);
            assert!(position > previous);
            previous = position;
        }

        let region = f.publication.log_buffers().acquire().unwrap();
        assert_eq!(region.log_meta_data().active_term_count(), 1);
        assert_eq!(
            region.term_meta_data(1).raw_tail_volatile(),
            pack_tail(INITIAL_TERM_ID + 1, 16 * 32)
        );
    }

    #[test]
    fn test_concurrent_offers_never_overlap() {
        let f = fixture(TERM_MIN_LENGTH * 4, i64::MAX);
        let threads = 4;
        let per_thread = 200;

        let positions: Vec<Vec<(i64, usize)>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..threads)
                .map(|_| {
                    s.spawn(|| {
                        let mut rng = rand::thread_rng();
                        let mut claimed = Vec::with_capacity(per_thread);
                        while claimed.len() < per_thread {
                            let length = rng.gen_range(0..256);
                            match f.publication.offer(&vec![0xAB; length]) {
                                Ok(position) => claimed.push((position, aligned_frame_length(length))),
                                Err(OfferError::AdminAction) => std::thread::yield_now(),
                                Err(e) => panic!("unexpected {e}"),
                            }
                        }
                        claimed
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let mut ranges: Vec<(i64, i64)> = positions
            .into_iter()
            .flatten()
            .map(|(end, length)| (end - length as i64, end))
            .collect();
        ranges.sort();
        let unique: HashSet<i64> = ranges.iter().map(|r| r.1).collect();
        assert_eq!(unique.len(), threads * per_thread);
        for pair in ranges.windows(2) {
            assert!(pair[0].1 <= pair[1].0, "{:?} overlaps {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_try_claim_commit_and_abort() {
        let f = fixture(TERM_MIN_LENGTH, i64::MAX);

        let mut claim = f.publication.try_claim(5).unwrap();
        assert_eq!(claim.position(), 64);
        claim.put_bytes(0, b"hello");
        claim.set_reserved_value(99);
        {
            let region = f.publication.log_buffers().acquire().unwrap();
            assert!(frame_length_volatile(&region.term_buffer(0), 0) < 0);
        }
        claim.commit();

        let aborted = f.publication.try_claim(10).unwrap();
        assert_eq!(aborted.position(), 128);
        aborted.abort();

        {
            let _dropped = f.publication.try_claim(3).unwrap();
        }

        let region = f.publication.log_buffers().acquire().unwrap();
        let term = region.term_buffer(0);
        assert_eq!(frame_length_volatile(&term, 0), 37);
        assert_eq!(frame_type(&term, 0), HDR_TYPE_DATA);
        assert_eq!(reserved_value(&term, 0), 99);
        let mut payload = [0u8; 5];
        term.get_bytes(HEADER_LENGTH, &mut payload);
        assert_eq!(&payload, b"hello");

        assert!(is_padding_frame(&term, 64));
        assert_eq!(frame_length_volatile(&term, 64), 42);
        assert!(is_padding_frame(&term, 128));
        assert_eq!(frame_length_volatile(&term, 128), 35);
    }

    #[test]
    fn test_claim_keeps_log_mapped_past_close() {
        let f = fixture(TERM_MIN_LENGTH, i64::MAX);
        let mut claim = f.publication.try_claim(4).unwrap();

        f.publication.close();
        assert!(f.publication.log_buffers().is_mapped());
        claim.buffer_mut().copy_from_slice(b"late");
        claim.commit();
        assert!(!f.publication.log_buffers().is_mapped());
    }
}
