use std::time::Instant;

use crate::core::types::SeqId;
use crate::posting::block_list::{BlockPostingList, PostingIterator};

/// Shared state threaded through an intersection run. Candidate ids are
/// checked against the excluded and filter arrays before emission; `index`
/// identifies the partition in parallel runs so emission stays lock-free.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResultIterState<'a> {
    pub excluded_ids: &'a [SeqId],
    pub filter_ids: &'a [SeqId],
    pub index: usize,
}

impl<'a> ResultIterState<'a> {
    pub fn new(excluded_ids: &'a [SeqId], filter_ids: &'a [SeqId]) -> Self {
        ResultIterState {
            excluded_ids,
            filter_ids,
            index: 0,
        }
    }
}

/// Decide whether a candidate id survives the exclusion and filter arrays.
pub fn take_id(state: &ResultIterState, id: SeqId) -> bool {
    if !state.excluded_ids.is_empty() && state.excluded_ids.binary_search(&id).is_ok() {
        return false;
    }

    if !state.filter_ids.is_empty() {
        return state.filter_ids.binary_search(&id).is_ok();
    }

    true
}

fn at_end(its: &[PostingIterator]) -> bool {
    // one exhausted iterator ends the whole intersection
    its.iter().any(|it| !it.valid())
}

fn equals(its: &[PostingIterator]) -> bool {
    its.windows(2).all(|w| w[0].id() == w[1].id())
}

fn advance_all(its: &mut [PostingIterator]) {
    for it in its.iter_mut() {
        it.next();
    }
}

/// Skip every iterator that is behind the current greatest id up to it.
fn advance_non_largest(its: &mut [PostingIterator]) {
    let greatest = its.iter().map(|it| it.id()).max().unwrap();

    for it in its.iter_mut() {
        if it.id() != greatest {
            it.skip_to(greatest);
        }
    }
}

/// Core multi-way intersection walk over prepared iterators. Each id that all
/// iterators agree on and `take_id` accepts is handed to `func` together with
/// the partition index. Returns false when the deadline cut the walk short.
pub fn block_intersect<F>(
    its: &mut [PostingIterator],
    state: &ResultIterState,
    deadline: Option<Instant>,
    func: &mut F,
) -> bool
where
    F: FnMut(SeqId, usize),
{
    // cooperative cancellation: consult the clock once per candidate
    let expired = || deadline.is_some_and(|d| Instant::now() >= d);

    match its.len() {
        0 => {}
        1 => {
            while its[0].valid() {
                if expired() {
                    return false;
                }

                if take_id(state, its[0].id()) {
                    func(its[0].id(), state.index);
                }
                its[0].next();
            }
        }
        2 => {
            while its[0].valid() && its[1].valid() {
                if its[0].id() == its[1].id() {
                    if expired() {
                        return false;
                    }

                    if take_id(state, its[0].id()) {
                        func(its[0].id(), state.index);
                    }
                    its[0].next();
                    its[1].next();
                } else if its[0].id() > its[1].id() {
                    its[1].skip_to(its[0].id());
                } else {
                    its[0].skip_to(its[1].id());
                }
            }
        }
        _ => {
            while !at_end(its) {
                if equals(its) {
                    if expired() {
                        return false;
                    }

                    if take_id(state, its[0].id()) {
                        func(its[0].id(), state.index);
                    }
                    advance_all(its);
                } else {
                    advance_non_largest(its);
                }
            }
        }
    }

    true
}

/// Union of the given block lists into a sorted id vector.
pub fn merge_block_lists(lists: &[&BlockPostingList]) -> Vec<SeqId> {
    let mut result = Vec::new();

    let mut its: Vec<PostingIterator> = lists.iter().map(|list| list.iter()).collect();
    result.reserve(lists.iter().map(|list| list.num_ids() as usize).sum());

    match its.len() {
        0 => {}
        1 => {
            while its[0].valid() {
                result.push(its[0].id());
                its[0].next();
            }
        }
        2 => {
            while its[0].valid() && its[1].valid() {
                if its[0].id() == its[1].id() {
                    result.push(its[0].id());
                    its[0].next();
                    its[1].next();
                } else if its[0].id() < its[1].id() {
                    result.push(its[0].id());
                    its[0].next();
                } else {
                    result.push(its[1].id());
                    its[1].next();
                }
            }

            // drain whichever side is left
            for it in its.iter_mut() {
                while it.valid() {
                    result.push(it.id());
                    it.next();
                }
            }
        }
        _ => {
            // k-way walk over whichever iterators are still live, so the
            // union stays sorted even when lists run dry at different times
            loop {
                let mut smallest: Option<SeqId> = None;
                for it in its.iter() {
                    if it.valid() {
                        smallest = Some(smallest.map_or(it.id(), |s| s.min(it.id())));
                    }
                }

                let Some(smallest) = smallest else { break };
                result.push(smallest);

                for it in its.iter_mut() {
                    if it.valid() && it.id() == smallest {
                        it.next();
                    }
                }
            }
        }
    }

    result
}

/// Intersection of the given block lists into a sorted id vector.
pub fn intersect_block_lists(lists: &[&BlockPostingList]) -> Vec<SeqId> {
    if lists.is_empty() {
        return Vec::new();
    }

    if lists.len() == 1 {
        return lists[0].uncompress();
    }

    let mut its: Vec<PostingIterator> = lists.iter().map(|list| list.iter()).collect();
    let mut result = Vec::new();
    let state = ResultIterState::default();

    block_intersect(&mut its, &state, None, &mut |id, _| result.push(id));

    result
}
