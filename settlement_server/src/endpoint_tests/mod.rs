mod commission;
mod helpers;
mod mocks;
mod settlement;
