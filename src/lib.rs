pub mod core;
pub mod compression;
pub mod posting;
pub mod numeric;
pub mod filter;
pub mod schema;
pub mod index;
pub mod join;

/*
┌─────────────────────────────────────────────────────────────────────────────┐
│                          VELDRIX STRUCT ARCHITECTURE                         │
└─────────────────────────────────────────────────────────────────────────────┘

┌──────────────────────────────── POSTING LAYER ──────────────────────────────┐
│                                                                              │
│  ┌────────────────────────┐     ┌─────────────────────────────────────┐     │
│  │ enum PostingHandle     │     │ struct BlockPostingList             │     │
│  │ • Compact(Compact...)  │────>│ • blocks: Vec<Block>  (slot arena)  │     │
│  │ • Full(Box<Block...>)  │     │ • summary: BTreeMap<last_id, slot>  │     │
│  │ promotion / demotion   │     │ • ids_len: u32                      │     │
│  └────────────────────────┘     └─────────────────────────────────────┘     │
│              │                                  │                            │
│              v                                  v                            │
│  ┌────────────────────────┐     ┌─────────────────────────────────────┐     │
│  │ struct CompactPosting  │     │ struct Block                        │     │
│  │ • ids: Vec<u32>        │     │ • ids: SortedIds (delta+vbyte)      │     │
│  │ • capacity: u16        │     │ • next: Option<slot>                │     │
│  └────────────────────────┘     └─────────────────────────────────────┘     │
│                                                                              │
│  ┌────────────────────────┐     ┌─────────────────────────────────────┐     │
│  │ struct BlockIntersector│     │ fn block_intersect(its, state, f)   │     │
│  │ • pool: rayon pool     │────>│ • k = 1 / 2 / n specializations     │     │
│  │ • window split         │     │ • take_id: excluded + filter arrays │     │
│  └────────────────────────┘     └─────────────────────────────────────┘     │
└──────────────────────────────────────────────────────────────────────────────┘

┌──────────────────────────────── QUERY LAYER ────────────────────────────────┐
│                                                                              │
│  ┌────────────────────────┐     ┌─────────────────────────────────────┐     │
│  │ struct FilterParser    │     │ struct FilterResultIterator         │     │
│  │ • nom 8 grammar        │────>│ • validity: Valid/Invalid/TimedOut  │     │
│  │ • && || ( ) $Coll(...) │     │ • seq_id, approx_filter_ids_length  │     │
│  └────────────────────────┘     │ • And / Or / Not / leaf cursors     │     │
│                                 │ • next, skip_to, get_n_ids          │     │
│  ┌────────────────────────┐     └─────────────────────────────────────┘     │
│  │ struct NumericIndex    │                      │                          │
│  │ • BTreeMap<i64,Handle> │<─────────────────────┘                          │
│  │ • search / range / topk│                                                 │
│  └────────────────────────┘                                                 │
└──────────────────────────────────────────────────────────────────────────────┘

┌─────────────────────────────── DOCUMENT LAYER ──────────────────────────────┐
│                                                                              │
│  ┌────────────────────────┐     ┌─────────────────────────────────────┐     │
│  │ struct CollectionIndex │     │ struct DocumentValidator            │     │
│  │ • token_index          │<────│ • dirty-value policies              │     │
│  │ • numeric_index        │     │ • canonical coercions (in place)    │     │
│  │ • reference_index      │     └─────────────────────────────────────┘     │
│  │ • seq_ids universe     │     ┌─────────────────────────────────────┐     │
│  └────────────────────────┘     │ struct JoinResolver                 │     │
│              ^                  │ • F$REF helper population           │     │
│  ┌────────────────────────┐     │ • $Coll(inner) query resolution     │     │
│  │ CollectionRegistry     │────>└─────────────────────────────────────┘     │
│  │ • RwLock per collection│                                                 │
│  └────────────────────────┘                                                 │
└──────────────────────────────────────────────────────────────────────────────┘
*/
