pub mod chore;
pub mod db;
mod error;
pub mod household;
pub mod logging;
pub mod migrate;
pub mod preferences;
pub mod time;

pub use chore::{
    add_chore, add_chore_history, get_chore, get_chore_history, remove_chore, update_chore, Chore,
    ChoreHistory, ChoreUpdate, NewChoreHistory, CHORE_TITLE_REQUIRED,
};
pub use error::{AppError, AppResult};
pub use household::{
    create_household, delete_household, get_household, get_household_by_code,
    get_household_detail, get_households_by_username, household_members, join_household,
    Household, HouseholdCreateError, HouseholdDetail, HouseholdWithMembers, JoinOutcome, Member,
};
pub use preferences::{Preferences, Subscription};
