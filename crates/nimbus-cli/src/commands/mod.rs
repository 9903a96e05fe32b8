mod doctor;
mod serve;

pub use doctor::DoctorCommand;
pub use serve::ServeCommand;
