use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

use log::debug;

use crate::core::error::{Error, Result};
use crate::core::types::{float_to_key, SeqId};
use crate::filter::ast::{FilterLeaf, FilterNode, FilterOp, FilterValue};
use crate::index::collection::CollectionIndex;
use crate::index::registry::CollectionRegistry;
use crate::join::resolver::JoinResolver;
use crate::numeric::num_index::{NumComparator, NumericIterator};
use crate::posting::block_list::{BlockPostingList, PostingIterator};
use crate::posting::handle::PostingHandle;
use crate::schema::schema::FieldType;

/// Iterator liveness tri-state. TimedOut latches: once the budget is blown
/// the iterator stays in that state for its remaining lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    Valid,
    Invalid,
    TimedOut,
}

/// Monotonic-clock search budget carried by every node.
#[derive(Debug, Clone, Copy)]
struct TimeBudget {
    begin: Instant,
    budget: Option<Duration>,
}

impl TimeBudget {
    fn start(budget_us: Option<u64>) -> Self {
        TimeBudget {
            begin: Instant::now(),
            budget: budget_us.map(Duration::from_micros),
        }
    }

    fn expired(&self) -> bool {
        self.budget
            .is_some_and(|budget| self.begin.elapsed() >= budget)
    }

    fn deadline(&self) -> Option<Instant> {
        self.budget.map(|budget| self.begin + budget)
    }
}

/// Cursor over an owned, materialized sorted id array.
#[derive(Debug)]
struct IdsCursor {
    ids: Vec<SeqId>,
    index: usize,
}

impl IdsCursor {
    fn new(ids: Vec<SeqId>) -> Self {
        IdsCursor { ids, index: 0 }
    }

    fn valid(&self) -> bool {
        self.index < self.ids.len()
    }

    fn id(&self) -> SeqId {
        self.ids[self.index]
    }

    fn next(&mut self) {
        self.index += 1;
    }

    fn skip_to(&mut self, id: SeqId) {
        self.index += self.ids[self.index..].partition_point(|&v| v < id);
    }

    fn reset(&mut self) {
        self.index = 0;
    }
}

/// Cursor over one posting set: compact sets are uncompressed up front,
/// block lists are walked through their iterator.
#[derive(Debug)]
enum ValueCursor<'a> {
    Ids(IdsCursor),
    List {
        list: &'a BlockPostingList,
        it: PostingIterator<'a>,
    },
}

impl<'a> ValueCursor<'a> {
    fn over(handle: &'a PostingHandle) -> Self {
        match handle {
            PostingHandle::Compact(list) => ValueCursor::Ids(IdsCursor::new(list.ids().to_vec())),
            PostingHandle::Full(boxed) => {
                let list = boxed.as_ref();
                ValueCursor::List {
                    list,
                    it: list.iter(),
                }
            }
        }
    }

    fn valid(&self) -> bool {
        match self {
            ValueCursor::Ids(cursor) => cursor.valid(),
            ValueCursor::List { it, .. } => it.valid(),
        }
    }

    fn id(&self) -> SeqId {
        match self {
            ValueCursor::Ids(cursor) => cursor.id(),
            ValueCursor::List { it, .. } => it.id(),
        }
    }

    fn next(&mut self) {
        match self {
            ValueCursor::Ids(cursor) => cursor.next(),
            ValueCursor::List { it, .. } => it.next(),
        }
    }

    fn skip_to(&mut self, id: SeqId) {
        match self {
            ValueCursor::Ids(cursor) => cursor.skip_to(id),
            ValueCursor::List { it, .. } => it.skip_to(id),
        }
    }

    fn reset(&mut self) {
        match self {
            ValueCursor::Ids(cursor) => cursor.reset(),
            ValueCursor::List { list, it } => *it = (*list).iter(),
        }
    }
}

/// Union of the posting sets of every value covered by a range predicate,
/// merged through a min-heap of per-value cursors.
#[derive(Debug)]
struct RangeUnionCursor<'a> {
    cursors: Vec<ValueCursor<'a>>,
    heap: BinaryHeap<Reverse<(SeqId, usize)>>,
}

impl<'a> RangeUnionCursor<'a> {
    fn new(cursors: Vec<ValueCursor<'a>>) -> Self {
        let mut union = RangeUnionCursor {
            cursors,
            heap: BinaryHeap::new(),
        };
        union.rebuild_heap();
        union
    }

    fn rebuild_heap(&mut self) {
        self.heap.clear();
        for (i, cursor) in self.cursors.iter().enumerate() {
            if cursor.valid() {
                self.heap.push(Reverse((cursor.id(), i)));
            }
        }
    }

    fn valid(&self) -> bool {
        !self.heap.is_empty()
    }

    fn id(&self) -> SeqId {
        self.heap.peek().unwrap().0 .0
    }

    /// Advance past the current id; all cursors sitting on it move together
    /// so duplicates across values collapse.
    fn next(&mut self) {
        let current = self.id();

        while let Some(&Reverse((id, i))) = self.heap.peek() {
            if id != current {
                break;
            }
            self.heap.pop();
            self.cursors[i].next();
            if self.cursors[i].valid() {
                self.heap.push(Reverse((self.cursors[i].id(), i)));
            }
        }
    }

    fn skip_to(&mut self, id: SeqId) {
        while let Some(&Reverse((head, i))) = self.heap.peek() {
            if head >= id {
                break;
            }
            self.heap.pop();
            self.cursors[i].skip_to(id);
            if self.cursors[i].valid() {
                self.heap.push(Reverse((self.cursors[i].id(), i)));
            }
        }
    }

    fn reset(&mut self) {
        for cursor in &mut self.cursors {
            cursor.reset();
        }
        self.rebuild_heap();
    }
}

#[derive(Debug)]
enum IterKind<'a> {
    /// Matches no documents.
    Nothing,
    Ids(IdsCursor),
    Token(ValueCursor<'a>),
    Numeric(NumericIterator<'a>),
    RangeUnion(RangeUnionCursor<'a>),
    Not {
        positive: Box<FilterResultIterator<'a>>,
        universe: Box<FilterResultIterator<'a>>,
    },
    And(Vec<FilterResultIterator<'a>>),
    Or(Vec<FilterResultIterator<'a>>),
}

/// Lazy evaluator of a parsed filter tree over a collection's indexes.
/// Yields matching seq_ids in strictly ascending order through `next` /
/// `skip_to`; owns its child iterators and any materialized id arrays, and
/// borrows the underlying posting sets, so it must not outlive its index.
#[derive(Debug)]
pub struct FilterResultIterator<'a> {
    pub validity: Validity,
    pub seq_id: SeqId,
    /// Upper bound of ids this subtree can yield; callers use it to pick an
    /// execution strategy before draining.
    pub approx_filter_ids_length: u32,
    kind: IterKind<'a>,
    budget: TimeBudget,
}

impl<'a> FilterResultIterator<'a> {
    pub fn new(
        node: &FilterNode,
        index: &'a CollectionIndex,
        registry: Option<&CollectionRegistry>,
        timeout_us: Option<u64>,
    ) -> Result<Self> {
        let budget = TimeBudget::start(timeout_us);
        Self::build(node, index, registry, budget)
    }

    /// Deadline shared with the parallel intersect workers.
    pub fn deadline(&self) -> Option<Instant> {
        self.budget.deadline()
    }

    fn nothing(budget: TimeBudget) -> Self {
        FilterResultIterator {
            validity: Validity::Invalid,
            seq_id: 0,
            approx_filter_ids_length: 0,
            kind: IterKind::Nothing,
            budget,
        }
    }

    fn from_ids(ids: Vec<SeqId>, budget: TimeBudget) -> Self {
        let mut it = FilterResultIterator {
            validity: Validity::Invalid,
            seq_id: 0,
            approx_filter_ids_length: ids.len() as u32,
            kind: IterKind::Ids(IdsCursor::new(ids)),
            budget,
        };
        it.sync();
        it
    }

    fn from_token_handle(handle: &'a PostingHandle, budget: TimeBudget) -> Self {
        let mut it = FilterResultIterator {
            validity: Validity::Invalid,
            seq_id: 0,
            approx_filter_ids_length: handle.num_ids(),
            kind: IterKind::Token(ValueCursor::over(handle)),
            budget,
        };
        it.sync();
        it
    }

    fn and_node(children: Vec<FilterResultIterator<'a>>, budget: TimeBudget) -> Self {
        let approx = children
            .iter()
            .map(|c| c.approx_filter_ids_length)
            .min()
            .unwrap_or(0);
        let mut it = FilterResultIterator {
            validity: Validity::Invalid,
            seq_id: 0,
            approx_filter_ids_length: approx,
            kind: IterKind::And(children),
            budget,
        };
        it.and_align();
        it
    }

    fn or_node(children: Vec<FilterResultIterator<'a>>, budget: TimeBudget) -> Self {
        let approx = children
            .iter()
            .fold(0u32, |acc, c| acc.saturating_add(c.approx_filter_ids_length));
        let mut it = FilterResultIterator {
            validity: Validity::Invalid,
            seq_id: 0,
            approx_filter_ids_length: approx,
            kind: IterKind::Or(children),
            budget,
        };
        it.or_align();
        it
    }

    fn not_node(
        positive: FilterResultIterator<'a>,
        universe: FilterResultIterator<'a>,
        budget: TimeBudget,
    ) -> Self {
        let approx = universe.approx_filter_ids_length;
        let mut it = FilterResultIterator {
            validity: Validity::Invalid,
            seq_id: 0,
            approx_filter_ids_length: approx,
            kind: IterKind::Not {
                positive: Box::new(positive),
                universe: Box::new(universe),
            },
            budget,
        };
        it.not_align();
        it
    }

    fn build(
        node: &FilterNode,
        index: &'a CollectionIndex,
        registry: Option<&CollectionRegistry>,
        budget: TimeBudget,
    ) -> Result<Self> {
        match node {
            FilterNode::Leaf(leaf) => Self::build_leaf(leaf, index, budget),
            FilterNode::And(nodes) => {
                let mut children = Vec::with_capacity(nodes.len());
                for child in nodes {
                    children.push(Self::build(child, index, registry, budget)?);
                }
                Ok(Self::and_node(children, budget))
            }
            FilterNode::Or(nodes) => {
                let mut children = Vec::with_capacity(nodes.len());
                for child in nodes {
                    children.push(Self::build(child, index, registry, budget)?);
                }
                Ok(Self::or_node(children, budget))
            }
            FilterNode::ReferenceJoin {
                collection,
                negated,
                inner,
            } => {
                let ids = JoinResolver::resolve_reference_filter(collection, inner, index, registry)?;
                let positive = Self::from_ids(ids, budget);
                if *negated {
                    let universe = Self::from_token_handle(index.seq_ids(), budget);
                    Ok(Self::not_node(positive, universe, budget))
                } else {
                    Ok(positive)
                }
            }
        }
    }

    fn build_leaf(
        leaf: &FilterLeaf,
        index: &'a CollectionIndex,
        budget: TimeBudget,
    ) -> Result<Self> {
        let field = index.schema().get_field(&leaf.field).ok_or_else(|| {
            Error::parse(format!(
                "Could not find a filter field named `{}` in the schema.",
                leaf.field
            ))
        })?;

        let wanted = if leaf.op == FilterOp::Range { 2 } else { 1 };
        if leaf.values.len() < wanted {
            return Err(Error::parse(format!(
                "Filter on field `{}` is missing a value.",
                leaf.field
            )));
        }

        if field.field_type.is_string() {
            return Self::build_string_leaf(leaf, index, budget);
        }
        if field.field_type.is_numeric() {
            return Self::build_numeric_leaf(leaf, field.field_type, index, budget);
        }

        Err(Error::parse(format!(
            "Filtering is not supported on field `{}`.",
            leaf.field
        )))
    }

    fn build_string_leaf(
        leaf: &FilterLeaf,
        index: &'a CollectionIndex,
        budget: TimeBudget,
    ) -> Result<Self> {
        let token_eq = |value: &FilterValue| -> Self {
            let token = filter_value_to_token(value);
            match index.token_handle(&leaf.field, &token) {
                Some(handle) => Self::from_token_handle(handle, budget),
                None => Self::nothing(budget),
            }
        };

        match leaf.op {
            FilterOp::Eq => Ok(token_eq(&leaf.values[0])),
            FilterOp::In => {
                let children = leaf.values.iter().map(token_eq).collect();
                Ok(Self::or_node(children, budget))
            }
            FilterOp::Neq => {
                let positive = token_eq(&leaf.values[0]);
                let universe = Self::from_token_handle(index.seq_ids(), budget);
                Ok(Self::not_node(positive, universe, budget))
            }
            FilterOp::NotIn => {
                let children = leaf.values.iter().map(token_eq).collect();
                let positive = Self::or_node(children, budget);
                let universe = Self::from_token_handle(index.seq_ids(), budget);
                Ok(Self::not_node(positive, universe, budget))
            }
            _ => Err(Error::parse(format!(
                "Operator not supported for string field `{}`.",
                leaf.field
            ))),
        }
    }

    fn build_numeric_leaf(
        leaf: &FilterLeaf,
        field_type: FieldType,
        index: &'a CollectionIndex,
        budget: TimeBudget,
    ) -> Result<Self> {
        let Some(tree) = index.numeric_index(&leaf.field) else {
            // no values indexed: negations match everything, the rest nothing
            if matches!(leaf.op, FilterOp::Neq | FilterOp::NotIn) {
                let universe = Self::from_token_handle(index.seq_ids(), budget);
                return Ok(Self::not_node(Self::nothing(budget), universe, budget));
            }
            return Ok(Self::nothing(budget));
        };

        let key = |value: &FilterValue| filter_value_to_key(value, field_type, &leaf.field);

        match leaf.op {
            FilterOp::Eq => {
                let it = tree.iterator(NumComparator::Equals, key(&leaf.values[0])?);
                Ok(Self::from_numeric(it, budget))
            }
            FilterOp::Neq => {
                let it = tree.iterator(NumComparator::Equals, key(&leaf.values[0])?);
                let positive = Self::from_numeric(it, budget);
                let universe = Self::from_token_handle(index.seq_ids(), budget);
                Ok(Self::not_node(positive, universe, budget))
            }
            FilterOp::In | FilterOp::NotIn => {
                let mut children = Vec::with_capacity(leaf.values.len());
                for value in &leaf.values {
                    let it = tree.iterator(NumComparator::Equals, key(value)?);
                    children.push(Self::from_numeric(it, budget));
                }
                let positive = Self::or_node(children, budget);
                if leaf.op == FilterOp::In {
                    return Ok(positive);
                }
                let universe = Self::from_token_handle(index.seq_ids(), budget);
                Ok(Self::not_node(positive, universe, budget))
            }
            FilterOp::Lt | FilterOp::Le | FilterOp::Gt | FilterOp::Ge => {
                let comparator = match leaf.op {
                    FilterOp::Lt => NumComparator::LessThan,
                    FilterOp::Le => NumComparator::LessThanEquals,
                    FilterOp::Gt => NumComparator::GreaterThan,
                    _ => NumComparator::GreaterThanEquals,
                };
                let value = key(&leaf.values[0])?;
                let handles = tree.handles_for(comparator, value);
                let approx = tree.approx_search_count(comparator, value);
                Ok(Self::from_range_handles(handles, approx, budget))
            }
            FilterOp::Range => {
                let lo = key(&leaf.values[0])?;
                let hi = key(&leaf.values[1])?;
                let handles = tree.handles_in_range_inclusive(lo, hi);
                let approx = tree.approx_range_inclusive_search_count(lo, hi);
                Ok(Self::from_range_handles(handles, approx, budget))
            }
        }
    }

    fn from_numeric(it: NumericIterator<'a>, budget: TimeBudget) -> Self {
        let mut iterator = FilterResultIterator {
            validity: Validity::Invalid,
            seq_id: 0,
            approx_filter_ids_length: it.approx_filter_ids_length,
            kind: IterKind::Numeric(it),
            budget,
        };
        iterator.sync();
        iterator
    }

    fn from_range_handles(
        handles: Vec<&'a PostingHandle>,
        approx: u32,
        budget: TimeBudget,
    ) -> Self {
        if handles.is_empty() {
            return Self::nothing(budget);
        }

        let cursors = handles.into_iter().map(ValueCursor::over).collect();
        let mut it = FilterResultIterator {
            validity: Validity::Invalid,
            seq_id: 0,
            approx_filter_ids_length: approx,
            kind: IterKind::RangeUnion(RangeUnionCursor::new(cursors)),
            budget,
        };
        it.sync();
        it
    }

    /// Refresh seq_id and validity from the underlying cursor.
    fn sync(&mut self) {
        let (valid, seq_id) = match &self.kind {
            IterKind::Nothing => (false, 0),
            IterKind::Ids(cursor) => (cursor.valid(), if cursor.valid() { cursor.id() } else { 0 }),
            IterKind::Token(cursor) => (cursor.valid(), if cursor.valid() { cursor.id() } else { 0 }),
            IterKind::Numeric(it) => (it.is_valid, it.seq_id),
            IterKind::RangeUnion(cursor) => {
                (cursor.valid(), if cursor.valid() { cursor.id() } else { 0 })
            }
            // compound kinds sync through their align routines
            IterKind::Not { .. } | IterKind::And(_) | IterKind::Or(_) => return,
        };

        if valid {
            self.seq_id = seq_id;
            self.validity = Validity::Valid;
        } else {
            self.validity = Validity::Invalid;
        }
    }

    /// Advance to the next matching id. Consults the budget and latches
    /// TimedOut when it is exhausted.
    pub fn next(&mut self) {
        if self.validity != Validity::Valid {
            return;
        }
        if self.budget.expired() {
            debug!("filter iterator timed out at seq_id {}", self.seq_id);
            self.validity = Validity::TimedOut;
            return;
        }
        self.advance();
    }

    /// Advance until seq_id reaches or overshoots id.
    pub fn skip_to(&mut self, id: SeqId) {
        if self.validity != Validity::Valid {
            return;
        }
        if self.budget.expired() {
            debug!("filter iterator timed out at seq_id {}", self.seq_id);
            self.validity = Validity::TimedOut;
            return;
        }
        self.seek(id);
    }

    fn advance(&mut self) {
        match &mut self.kind {
            IterKind::Nothing => self.validity = Validity::Invalid,
            IterKind::Ids(cursor) => {
                cursor.next();
                self.sync();
            }
            IterKind::Token(cursor) => {
                cursor.next();
                self.sync();
            }
            IterKind::Numeric(it) => {
                it.next();
                self.sync();
            }
            IterKind::RangeUnion(cursor) => {
                cursor.next();
                self.sync();
            }
            IterKind::Not { universe, .. } => {
                universe.advance();
                self.not_align();
            }
            IterKind::And(children) => {
                for child in children.iter_mut() {
                    child.advance();
                }
                self.and_align();
            }
            IterKind::Or(children) => {
                let current = self.seq_id;
                for child in children.iter_mut() {
                    if child.validity == Validity::Valid && child.seq_id == current {
                        child.advance();
                    }
                }
                self.or_align();
            }
        }
    }

    fn seek(&mut self, id: SeqId) {
        match &mut self.kind {
            IterKind::Nothing => self.validity = Validity::Invalid,
            IterKind::Ids(cursor) => {
                cursor.skip_to(id);
                self.sync();
            }
            IterKind::Token(cursor) => {
                cursor.skip_to(id);
                self.sync();
            }
            IterKind::Numeric(it) => {
                it.skip_to(id);
                self.sync();
            }
            IterKind::RangeUnion(cursor) => {
                cursor.skip_to(id);
                self.sync();
            }
            IterKind::Not { universe, .. } => {
                universe.seek(id);
                self.not_align();
            }
            IterKind::And(children) => {
                for child in children.iter_mut() {
                    if child.validity == Validity::Valid {
                        child.seek(id);
                    }
                }
                self.and_align();
            }
            IterKind::Or(children) => {
                for child in children.iter_mut() {
                    if child.validity == Validity::Valid && child.seq_id < id {
                        child.seek(id);
                    }
                }
                self.or_align();
            }
        }
    }

    /// Re-establish the AND invariant: every child on the same id.
    fn and_align(&mut self) {
        let IterKind::And(children) = &mut self.kind else {
            return;
        };

        if children.is_empty() {
            self.validity = Validity::Invalid;
            return;
        }

        loop {
            if children.iter().any(|c| c.validity != Validity::Valid) {
                self.validity = Validity::Invalid;
                return;
            }

            let max = children.iter().map(|c| c.seq_id).max().unwrap();
            if children.iter().all(|c| c.seq_id == max) {
                self.seq_id = max;
                self.validity = Validity::Valid;
                return;
            }

            for child in children.iter_mut() {
                if child.seq_id < max {
                    child.seek(max);
                }
            }
        }
    }

    /// OR emits the minimum id across its live children.
    fn or_align(&mut self) {
        let IterKind::Or(children) = &mut self.kind else {
            return;
        };

        let min = children
            .iter()
            .filter(|c| c.validity == Validity::Valid)
            .map(|c| c.seq_id)
            .min();

        match min {
            Some(min) => {
                self.seq_id = min;
                self.validity = Validity::Valid;
            }
            None => self.validity = Validity::Invalid,
        }
    }

    /// NOT: walk the universe, skipping ids the positive side matches.
    fn not_align(&mut self) {
        let IterKind::Not { positive, universe } = &mut self.kind else {
            return;
        };

        loop {
            if universe.validity != Validity::Valid {
                self.validity = Validity::Invalid;
                return;
            }

            if positive.validity == Validity::Valid && positive.seq_id < universe.seq_id {
                positive.seek(universe.seq_id);
            }

            if positive.validity == Validity::Valid && positive.seq_id == universe.seq_id {
                universe.advance();
                continue;
            }

            self.seq_id = universe.seq_id;
            self.validity = Validity::Valid;
            return;
        }
    }

    /// Constant-protocol check whether skip_to(id) would land exactly on id:
    /// 1 = yes, 0 = no but ids remain, -1 = iterator exhausted.
    pub fn is_valid(&mut self, id: SeqId) -> i32 {
        if self.validity != Validity::Valid {
            return -1;
        }

        self.skip_to(id);
        if self.validity == Validity::Valid {
            (self.seq_id == id) as i32
        } else {
            -1
        }
    }

    /// Return to the initial position. A latched timeout survives reset.
    pub fn reset(&mut self) {
        if self.validity == Validity::TimedOut {
            return;
        }

        match &mut self.kind {
            IterKind::Nothing => self.validity = Validity::Invalid,
            IterKind::Ids(cursor) => {
                cursor.reset();
                self.sync();
            }
            IterKind::Token(cursor) => {
                cursor.reset();
                self.sync();
            }
            IterKind::Numeric(it) => {
                it.reset();
                self.sync();
            }
            IterKind::RangeUnion(cursor) => {
                cursor.reset();
                self.sync();
            }
            IterKind::Not { positive, universe } => {
                positive.reset();
                universe.reset();
                self.not_align();
            }
            IterKind::And(children) => {
                for child in children.iter_mut() {
                    child.reset();
                }
                self.and_align();
            }
            IterKind::Or(children) => {
                for child in children.iter_mut() {
                    child.reset();
                }
                self.or_align();
            }
        }
    }

    /// Drain every remaining id into a vector.
    pub fn to_filter_id_array(&mut self) -> Vec<SeqId> {
        let mut ids = Vec::new();
        while self.validity == Validity::Valid {
            ids.push(self.seq_id);
            self.next();
        }
        ids
    }

    /// Emit up to n ids, skipping the sorted excluded list. The excluded
    /// cursor position persists across calls. With `override_timeout` a
    /// latched timeout is suspended so in-flight partial results can still
    /// be reaped; the latch is restored afterwards.
    pub fn get_n_ids(
        &mut self,
        n: usize,
        excluded_index: &mut usize,
        excluded_ids: &[SeqId],
        out: &mut Vec<SeqId>,
        override_timeout: bool,
    ) -> usize {
        let was_timed_out = self.validity == Validity::TimedOut;
        if was_timed_out {
            if !override_timeout {
                return 0;
            }
            // the latch fires before the current id is consumed, so it is
            // safe to resume from it
            self.validity = Validity::Valid;
        }

        let mut emitted = 0;
        while self.validity == Validity::Valid && emitted < n {
            if !override_timeout && self.budget.expired() {
                self.validity = Validity::TimedOut;
                break;
            }

            let id = self.seq_id;
            while *excluded_index < excluded_ids.len() && excluded_ids[*excluded_index] < id {
                *excluded_index += 1;
            }

            let excluded =
                *excluded_index < excluded_ids.len() && excluded_ids[*excluded_index] == id;
            if !excluded {
                out.push(id);
                emitted += 1;
            }

            self.advance();
        }

        if was_timed_out && self.validity == Validity::Valid {
            self.validity = Validity::TimedOut;
        }

        emitted
    }

    /// Intersect with an externally supplied sorted id array (e.g. the text
    /// search result set), appending matches to out.
    pub fn and_scalar(&mut self, ids: &[SeqId], out: &mut Vec<SeqId>) -> usize {
        let mut i = 0;
        let before = out.len();

        while self.validity == Validity::Valid && i < ids.len() {
            if self.seq_id == ids[i] {
                out.push(ids[i]);
                i += 1;
                self.next();
            } else if self.seq_id < ids[i] {
                self.skip_to(ids[i]);
            } else {
                i += ids[i..].partition_point(|&v| v < self.seq_id);
            }
        }

        out.len() - before
    }

    /// Early-exit probe: does this filter match at least one id of the given
    /// posting set?
    pub fn contains_atleast_one(&mut self, handle: &PostingHandle) -> bool {
        let target_ids = handle.uncompress();
        let mut i = 0;

        while self.validity == Validity::Valid && i < target_ids.len() {
            if self.seq_id == target_ids[i] {
                return true;
            }
            if self.seq_id < target_ids[i] {
                self.skip_to(target_ids[i]);
            } else {
                i += target_ids[i..].partition_point(|&v| v < self.seq_id);
            }
        }

        false
    }
}

/// AND the iterator in place with a materialized phrase-match id array: the
/// tree is replaced by an AND node whose right child walks the array.
pub fn add_phrase_ids(iter: &mut FilterResultIterator<'_>, phrase_ids: Vec<SeqId>) {
    let budget = iter.budget;
    let original = std::mem::replace(iter, FilterResultIterator::nothing(budget));
    let phrase_leaf = FilterResultIterator::from_ids(phrase_ids, budget);
    *iter = FilterResultIterator::and_node(vec![original, phrase_leaf], budget);
}

fn filter_value_to_token(value: &FilterValue) -> String {
    match value {
        FilterValue::Str(s) => s.clone(),
        FilterValue::Int(v) => v.to_string(),
        FilterValue::Float(v) => v.to_string(),
        FilterValue::Bool(v) => v.to_string(),
    }
}

fn filter_value_to_key(value: &FilterValue, field_type: FieldType, field: &str) -> Result<i64> {
    let is_float_field = matches!(field_type, FieldType::Float | FieldType::FloatArray);

    let key = match value {
        FilterValue::Int(v) => {
            if is_float_field {
                float_to_key(*v as f64)
            } else {
                *v
            }
        }
        FilterValue::Float(v) => {
            if is_float_field {
                float_to_key(*v)
            } else {
                *v as i64
            }
        }
        FilterValue::Bool(v) => *v as i64,
        FilterValue::Str(s) => {
            let parsed: f64 = s.trim().parse().map_err(|_| {
                Error::parse(format!(
                    "Value of filter field `{}` must be numeric.",
                    field
                ))
            })?;
            if is_float_field {
                float_to_key(parsed)
            } else {
                parsed as i64
            }
        }
    };

    Ok(key)
}
