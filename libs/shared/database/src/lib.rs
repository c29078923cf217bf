pub mod memory;
pub mod store;
pub mod supabase;
pub mod supabase_store;

pub use memory::MemoryStore;
pub use store::{LockScope, SchedulingStore, SchedulingTx, StoreError};
pub use supabase::{SupabaseClient, SupabaseError};
pub use supabase_store::SupabaseStore;
