pub mod add;
pub mod delete;
pub mod r#do;
pub mod due;
pub mod list;
pub mod next;
pub mod reminders;
pub mod run;
