use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_query::Expr;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // One row per voter identity; resubmissions overwrite in place
        manager
            .create_table(
                Table::create()
                    .table(Votes::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Votes::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Votes::Identity)
                            .string_len(128)
                            .not_null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(Votes::MainChoice)
                            .small_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Votes::RepresentativeChoice)
                            .string_len(3)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Votes::CharityChoice)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(ColumnDef::new(Votes::Postcode).string_len(10).null())
                    .col(ColumnDef::new(Votes::BirthYear).integer().null())
                    .col(
                        ColumnDef::new(Votes::DonationAmount)
                            .big_integer()
                            .not_null(),
                    )
                    // Gateway transaction ids have no documented length.
                    .col(ColumnDef::new(Votes::TransactionId).text().null())
                    .col(
                        ColumnDef::new(Votes::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Votes::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Recent-votes feed reads newest writes first
        manager
            .create_index(
                Index::create()
                    .name("idx_votes_updated_at")
                    .table(Votes::Table)
                    .col(Votes::UpdatedAt)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Votes::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Votes {
    Table,
    Id,
    Identity,
    MainChoice,
    RepresentativeChoice,
    CharityChoice,
    Postcode,
    BirthYear,
    DonationAmount,
    TransactionId,
    CreatedAt,
    UpdatedAt,
}
