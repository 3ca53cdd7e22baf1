pub mod issuer;
pub mod token;

pub use issuer::TicketLedger;
pub use token::generate_qr_token;
