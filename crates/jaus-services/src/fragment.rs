//! Large data sets: splitting an oversized message into fragments and
//! merging them back.
//!
//! Every fragment carries a copy of the original header with its own data
//! flag, data size and sequence number. Sequence numbers run consecutively
//! from the original header's sequence number and wrap at `u16::MAX`, so all
//! ordering inside a set is relative to its first fragment.

use std::collections::HashMap;

use bytes::{BufMut, Bytes, BytesMut};

use jaus_core::wire::{Address, DataFlag, Header, WireError, HEADER_SIZE, MAX_DATA_SIZE};

/// Most fragments one message can be split into.
pub const MAX_FRAGMENTS: usize = u16::MAX as usize + 1;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FragmentError {
    #[error("header: {0}")]
    Header(#[from] WireError),

    #[error("declared body of {declared} bytes, buffer holds {available}")]
    Truncated { declared: usize, available: usize },

    #[error("body of {body} bytes fits in one fragment of {max_payload}")]
    FitsInOne { body: usize, max_payload: usize },

    #[error("fragment payload size must be non-zero")]
    ZeroPayload,

    #[error("body needs {0} fragments, at most {MAX_FRAGMENTS} allowed")]
    TooManyFragments(usize),

    #[error("message is already a fragment (flag {0:?})")]
    AlreadyFragmented(DataFlag),

    #[error("single message is not a fragment")]
    NotAFragment,

    #[error("fragment set incomplete, missing {missing} fragments")]
    Incomplete { missing: usize },

    #[error("merged body of {0} bytes exceeds {MAX_DATA_SIZE}")]
    TooLarge(usize),
}

// ── Fragment ──────────────────────────────────────────────────────────────────

/// One piece of a large data set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    header: Header,
    payload: Bytes,
}

impl Fragment {
    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn sequence_number(&self) -> u16 {
        self.header.sequence_number
    }

    pub fn flag(&self) -> DataFlag {
        self.header.data_flag
    }

    pub fn is_first(&self) -> bool {
        self.header.data_flag == DataFlag::First
    }

    pub fn is_last(&self) -> bool {
        self.header.data_flag == DataFlag::Last
    }

    pub fn key(&self) -> FragmentKey {
        FragmentKey::of(&self.header)
    }

    /// Copy of this fragment flagged for re-transmission.
    ///
    /// First and last fragments keep their flags, since the receiver needs
    /// them to bound the set.
    pub fn as_retransmit(&self) -> Fragment {
        let mut header = self.header;
        if header.data_flag == DataFlag::Normal {
            header.data_flag = DataFlag::Retransmit;
        }
        Fragment {
            header,
            payload: self.payload.clone(),
        }
    }

    /// Header followed by payload, ready for the transport.
    pub fn to_bytes(&self) -> Result<Bytes, FragmentError> {
        let mut out = BytesMut::with_capacity(HEADER_SIZE + self.payload.len());
        out.put_slice(&self.header.encode()?);
        out.put_slice(&self.payload);
        Ok(out.freeze())
    }

    /// Parse a fragment from wire bytes. The buffer must hold exactly the
    /// header and the declared payload.
    pub fn parse(bytes: &[u8]) -> Result<Fragment, FragmentError> {
        let header = Header::parse(bytes)?;
        if header.data_flag == DataFlag::Single {
            return Err(FragmentError::NotAFragment);
        }
        let declared = header.data_size as usize;
        let available = bytes.len() - HEADER_SIZE;
        if declared != available {
            return Err(FragmentError::Truncated {
                declared,
                available,
            });
        }
        Ok(Fragment {
            header,
            payload: Bytes::copy_from_slice(&bytes[HEADER_SIZE..]),
        })
    }
}

/// Identity shared by every fragment of one set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FragmentKey {
    pub source: Address,
    pub destination: Address,
    pub command_code: u16,
}

impl FragmentKey {
    pub fn of(header: &Header) -> Self {
        Self {
            source: header.source,
            destination: header.destination,
            command_code: header.command_code,
        }
    }
}

impl std::fmt::Display for FragmentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} -> {} 0x{:04x}",
            self.source, self.destination, self.command_code
        )
    }
}

// ── Splitting ─────────────────────────────────────────────────────────────────

/// Split an encoded message (header + body) into fragments carrying at most
/// `max_payload` body bytes each.
pub fn create_fragments(
    message: &[u8],
    max_payload: usize,
) -> Result<Vec<Fragment>, FragmentError> {
    let header = Header::parse(message)?;
    if header.data_flag != DataFlag::Single {
        return Err(FragmentError::AlreadyFragmented(header.data_flag));
    }
    let declared = header.data_size as usize;
    let available = message.len() - HEADER_SIZE;
    if declared > available {
        return Err(FragmentError::Truncated {
            declared,
            available,
        });
    }
    if max_payload == 0 {
        return Err(FragmentError::ZeroPayload);
    }
    if declared <= max_payload {
        return Err(FragmentError::FitsInOne {
            body: declared,
            max_payload,
        });
    }
    let count = declared.div_ceil(max_payload);
    if count > MAX_FRAGMENTS {
        return Err(FragmentError::TooManyFragments(count));
    }

    let body = Bytes::copy_from_slice(&message[HEADER_SIZE..HEADER_SIZE + declared]);
    let fragments: Vec<Fragment> = (0..count)
        .map(|index| {
            let start = index * max_payload;
            let end = (start + max_payload).min(declared);
            let data_flag = if index == 0 {
                DataFlag::First
            } else if index == count - 1 {
                DataFlag::Last
            } else {
                DataFlag::Normal
            };
            Fragment {
                header: Header {
                    data_flag,
                    data_size: (end - start) as u16,
                    sequence_number: header.sequence_number.wrapping_add(index as u16),
                    ..header
                },
                payload: body.slice(start..end),
            }
        })
        .collect();

    tracing::trace!(
        code = header.command_code,
        body = declared,
        fragments = fragments.len(),
        max_payload,
        "message split into fragments"
    );
    Ok(fragments)
}

/// The fragments whose sequence numbers appear in `missing`, flagged for
/// re-transmission. Unknown sequence numbers are ignored.
pub fn select_retransmits(fragments: &[Fragment], missing: &[u16]) -> Vec<Fragment> {
    fragments
        .iter()
        .filter(|f| missing.contains(&f.sequence_number()))
        .map(Fragment::as_retransmit)
        .collect()
}

fn within(seq: u16, (first, last): (u16, u16)) -> bool {
    seq.wrapping_sub(first) <= last.wrapping_sub(first)
}

// ── Reassembly ────────────────────────────────────────────────────────────────

/// All fragments received so far for one large data set.
#[derive(Debug, Clone)]
pub struct FragmentSet {
    key: FragmentKey,
    fragments: HashMap<u16, Fragment>,
    first: Option<u16>,
    last: Option<u16>,
    /// Fragments held between `first` and `last`, once both are known.
    in_span: usize,
    complete: bool,
}

impl FragmentSet {
    /// Open a set whose identity is taken from `fragment`, which need not be
    /// the first one sent.
    pub fn start(fragment: Fragment) -> Self {
        let mut set = Self {
            key: fragment.key(),
            fragments: HashMap::new(),
            first: None,
            last: None,
            in_span: 0,
            complete: false,
        };
        set.insert(fragment);
        set
    }

    pub fn key(&self) -> FragmentKey {
        self.key
    }

    /// Add a fragment. Returns `false` if it belongs to another set.
    /// A sequence number already held is left untouched.
    pub fn add_fragment(&mut self, fragment: Fragment) -> bool {
        if fragment.key() != self.key {
            tracing::warn!(
                set = %self.key,
                fragment = %fragment.key(),
                seq = fragment.sequence_number(),
                "fragment does not belong to this set"
            );
            return false;
        }
        self.insert(fragment);
        true
    }

    fn insert(&mut self, fragment: Fragment) {
        let seq = fragment.sequence_number();
        if self.fragments.contains_key(&seq) {
            tracing::trace!(set = %self.key, seq, "duplicate fragment ignored");
            return;
        }
        let before = self.bounds();
        if fragment.is_first() {
            self.first = Some(seq);
        }
        if fragment.is_last() {
            self.last = Some(seq);
        }
        self.fragments.insert(seq, fragment);

        match self.bounds() {
            Some(bounds) if before == Some(bounds) => {
                if within(seq, bounds) {
                    self.in_span += 1;
                }
            }
            Some(bounds) => {
                self.in_span = self.fragments.keys().filter(|s| within(**s, bounds)).count();
            }
            None => {}
        }
        self.complete = self.expected() == Some(self.in_span);
    }

    fn bounds(&self) -> Option<(u16, u16)> {
        Some((self.first?, self.last?))
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn received(&self) -> usize {
        self.fragments.len()
    }

    /// Number of fragments in the set, once both ends have arrived.
    pub fn expected(&self) -> Option<usize> {
        self.bounds()
            .map(|(first, last)| last.wrapping_sub(first) as usize + 1)
    }

    /// Sequence numbers not yet received, in sending order.
    ///
    /// With both ends known this covers the whole set. With one end known it
    /// covers the gap between that end and the farthest fragment received.
    /// With neither end known nothing can be said.
    pub fn missing_packets(&self) -> Vec<u16> {
        let (start, span) = match (self.first, self.last) {
            (Some(first), Some(last)) => (first, last.wrapping_sub(first)),
            (Some(first), None) => {
                let far = self.fragments.keys().map(|s| s.wrapping_sub(first)).max();
                (first, far.unwrap_or(0))
            }
            (None, Some(last)) => {
                let back = self.fragments.keys().map(|s| last.wrapping_sub(*s)).max();
                let back = back.unwrap_or(0);
                (last.wrapping_sub(back), back)
            }
            (None, None) => return Vec::new(),
        };
        (0..=span as u32)
            .map(|offset| start.wrapping_add(offset as u16))
            .filter(|seq| !self.fragments.contains_key(seq))
            .collect()
    }

    /// Rebuild the original message: the first fragment's header flagged
    /// `Single` with the total size, then every payload in sending order.
    pub fn merge(&self) -> Result<Bytes, FragmentError> {
        let (first, last) = match self.bounds() {
            Some(bounds) if self.complete => bounds,
            _ => {
                return Err(FragmentError::Incomplete {
                    missing: self.missing_packets().len().max(1),
                })
            }
        };

        let ordered: Vec<&Fragment> = (0..=last.wrapping_sub(first) as u32)
            .filter_map(|offset| self.fragments.get(&first.wrapping_add(offset as u16)))
            .collect();
        let total: usize = ordered.iter().map(|f| f.payload.len()).sum();
        if total > MAX_DATA_SIZE {
            return Err(FragmentError::TooLarge(total));
        }

        let template = ordered
            .first()
            .map(|f| f.header)
            .ok_or(FragmentError::Incomplete { missing: 1 })?;
        let header = Header {
            data_flag: DataFlag::Single,
            data_size: total as u16,
            ..template
        };

        let mut out = BytesMut::with_capacity(HEADER_SIZE + total);
        out.put_slice(&header.encode()?);
        for fragment in ordered {
            out.put_slice(&fragment.payload);
        }
        Ok(out.freeze())
    }
}
